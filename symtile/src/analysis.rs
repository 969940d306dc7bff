// analysis.rs — Symbolic tile analysis of a fusion
//
// Walks a `Computation` backward from its root, deriving one symbolic tile
// per (instruction, read pattern), deduplicating equal tiled nodes and
// intersecting every rule's constraints into one global constraint. The
// finished analysis is immutable and answers queries for concrete tile sizes:
// constraint checks, backend checks, materialization and tiling search.
//
// Preconditions: `comp` is a verified computation.
// Postconditions: nodes are in def-before-use order with the root last; the
//                 global constraint includes `1 <= s_i <= root_dim_i`.
// Failure modes: E03xx for graphs that cannot be tiled; E040x for queries
//                with the wrong number of, or invalid, tile sizes.
// Side effects: interns expressions in the shared context.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::{TilingConfig, TritonConstraints};
use crate::constraint::{ConstraintExpression, Interval};
use crate::diag::{codes, Diagnostic};
use crate::expr::{EvalError, ExprContext, ExprId, Var};
use crate::graph::{fmt_dims, Computation, Instruction};
use crate::search::{try_good_tilings, Tiling};
use crate::symbolic_tile::{operand_tiles, render_exprs, SymbolicTile};
use crate::tiled_computation::TiledComputation;
use crate::tiled_node::SymbolicTiledNode;

// ── Public types ────────────────────────────────────────────────────────────

/// Tile sizes of one node together with the node's extents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSizeMap {
    pub sizes: Vec<ExprId>,
    pub extents: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct SymbolicTileAnalysis {
    cx: Arc<ExprContext>,
    computation: Computation,
    nodes: Vec<SymbolicTiledNode>,
    constraints: ConstraintExpression,
    tile_size_maps: Vec<TileSizeMap>,
}

// ── Construction ────────────────────────────────────────────────────────────

struct AnalysisBuilder<'a> {
    cx: &'a ExprContext,
    nodes: Vec<SymbolicTiledNode>,
    buckets: HashMap<u64, Vec<usize>>,
    constraints: ConstraintExpression,
}

impl<'a> AnalysisBuilder<'a> {
    /// Insert `tile` of `instr`, or merge it into an equal existing node.
    /// Returns the node index and whether it was newly created.
    fn insert(&mut self, instr: &Instruction, tile: SymbolicTile) -> (usize, bool) {
        self.constraints = self.constraints.and(&tile.constraints);

        let node = SymbolicTiledNode::new(self.cx, instr, tile);
        let bucket = self.buckets.entry(node.hash).or_default();
        if let Some(&existing) = bucket
            .iter()
            .find(|&&i| self.nodes[i].matches(node.instr, &node.tile))
        {
            let merged = self.nodes[existing].tile.constraints.and(&node.tile.constraints);
            self.nodes[existing].tile.constraints = merged;
            return (existing, false);
        }
        let index = self.nodes.len();
        bucket.push(index);
        self.nodes.push(node);
        (index, true)
    }
}

fn check_extents(instr: &Instruction) -> Result<(), Diagnostic> {
    match instr.shape.iter().position(|&d| d == 0) {
        Some(dim) => Err(Diagnostic::error(
            codes::E0303,
            format!(
                "instruction '{}' has a zero-sized dimension {} in shape {}",
                instr.name,
                dim,
                fmt_dims(&instr.shape)
            ),
        )),
        None => Ok(()),
    }
}

/// Def-before-use order: iterative DFS postorder from `root`.
fn postorder(nodes: &[SymbolicTiledNode], root: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
    visited[root] = true;
    while let Some(top) = stack.last_mut() {
        let (node, next) = *top;
        match nodes[node].operands.get(next) {
            Some(&child) => {
                top.1 += 1;
                if !visited[child] {
                    visited[child] = true;
                    stack.push((child, 0));
                }
            }
            None => {
                order.push(node);
                stack.pop();
            }
        }
    }
    order
}

impl SymbolicTileAnalysis {
    /// Build the analysis, or explain why the fusion cannot be tiled.
    pub fn analyze_computation(
        comp: &Computation,
        cx: Arc<ExprContext>,
    ) -> Result<Self, Diagnostic> {
        let root = comp.root();
        check_extents(root)?;

        let mut root_bounds = ConstraintExpression::always_satisfied();
        for (i, &extent) in root.shape.iter().enumerate() {
            let bound = ConstraintExpression::from_constraint(
                &cx,
                cx.symbol(i as u32),
                Interval::new(1, extent),
            );
            root_bounds = root_bounds.and(&bound);
        }

        let mut builder = AnalysisBuilder {
            cx: &cx,
            nodes: Vec::new(),
            buckets: HashMap::new(),
            constraints: root_bounds,
        };

        let (root_index, _) = builder.insert(root, SymbolicTile::root(&cx, root.rank()));
        let mut worklist = VecDeque::from([root_index]);

        while let Some(index) = worklist.pop_front() {
            let instr = comp.instr(builder.nodes[index].instr);
            let tiles = operand_tiles(&cx, comp, instr, &builder.nodes[index].tile)?;
            for (k, tile) in tiles.into_iter().enumerate() {
                let operand = comp.instr(instr.operands[k]);
                check_extents(operand)?;
                let (child, is_new) = builder.insert(operand, tile);
                if !builder.constraints.is_satisfiable() {
                    return Err(Diagnostic::error(
                        codes::E0304,
                        format!(
                            "tiling constraints became unsatisfiable while mapping tiles through '{}' ({})",
                            instr.name,
                            instr.kind.name()
                        ),
                    )
                    .with_hint("no tile size assignment can satisfy this fusion; split it"));
                }
                builder.nodes[index].operands.push(child);
                if is_new {
                    worklist.push_back(child);
                }
            }
        }

        let AnalysisBuilder {
            nodes, constraints, ..
        } = builder;
        let order = postorder(&nodes, root_index);
        let mut remap = vec![usize::MAX; nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }
        let mut slots: Vec<Option<SymbolicTiledNode>> = nodes.into_iter().map(Some).collect();
        let nodes: Vec<SymbolicTiledNode> = order
            .iter()
            .filter_map(|&old| slots[old].take())
            .map(|mut node| {
                node.operands = node.operands.iter().map(|&o| remap[o]).collect();
                node
            })
            .collect();

        let mut tile_size_maps: Vec<TileSizeMap> = Vec::new();
        for node in &nodes {
            let map = TileSizeMap {
                sizes: node.tile.sizes(),
                extents: comp.instr(node.instr).shape.clone(),
            };
            if !tile_size_maps.contains(&map) {
                tile_size_maps.push(map);
            }
        }

        Ok(SymbolicTileAnalysis {
            cx,
            computation: comp.clone(),
            nodes,
            constraints,
            tile_size_maps,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn context(&self) -> &Arc<ExprContext> {
        &self.cx
    }

    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    /// Tiled nodes in def-before-use order.
    pub fn nodes(&self) -> &[SymbolicTiledNode] {
        &self.nodes
    }

    pub fn root(&self) -> &SymbolicTiledNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn instr(&self, node: &SymbolicTiledNode) -> &Instruction {
        self.computation.instr(node.instr)
    }

    pub fn root_shape(&self) -> &[i64] {
        &self.computation.root().shape
    }

    pub fn num_tile_parameters(&self) -> usize {
        self.computation.root().rank()
    }

    pub fn constraints(&self) -> &ConstraintExpression {
        &self.constraints
    }

    pub fn tile_size_maps(&self) -> &[TileSizeMap] {
        &self.tile_size_maps
    }

    // ── Queries ─────────────────────────────────────────────────────────

    fn unbound(&self, var: Var, given: usize) -> Diagnostic {
        Diagnostic::error(
            codes::E0400,
            format!(
                "constraint over '{}' cannot be evaluated: {} of {} tile sizes given",
                var,
                given,
                self.num_tile_parameters()
            ),
        )
        .with_hint("pass one tile size per root dimension")
    }

    fn too_many(&self, given: usize) -> Diagnostic {
        Diagnostic::error(
            codes::E0401,
            format!(
                "expected {} tile sizes for root shape {}, got {}",
                self.num_tile_parameters(),
                fmt_dims(self.root_shape()),
                given
            ),
        )
    }

    /// Whether `params` (tile sizes bound to `s0..sn`) satisfy the global
    /// constraint.
    pub fn parameters_satisfy_constraints(&self, params: &[i64]) -> Result<bool, Diagnostic> {
        if params.len() > self.num_tile_parameters() {
            return Err(self.too_many(params.len()));
        }
        self.constraints
            .is_satisfied_by(&self.cx, params)
            .map_err(|var| self.unbound(var, params.len()))
    }

    /// Global constraint plus the backend's tile-shape rules on every unique
    /// tile-size map.
    pub fn parameters_satisfy_triton_constraints(
        &self,
        params: &[i64],
        triton: &TritonConstraints,
    ) -> Result<bool, Diagnostic> {
        if !self.parameters_satisfy_constraints(params)? {
            return Ok(false);
        }
        for map in &self.tile_size_maps {
            let mut sizes = Vec::with_capacity(map.sizes.len());
            for &size in &map.sizes {
                match self.cx.evaluate(size, &[], params) {
                    Ok(v) => sizes.push(v),
                    Err(EvalError::Unbound(var)) => return Err(self.unbound(var, params.len())),
                    Err(EvalError::DivisionByZero) | Err(EvalError::Overflow) => return Ok(false),
                }
            }
            if !triton.accepts(&sizes, &map.extents) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Concrete tiled computation for `params`.
    pub fn compute_tiled_instructions(
        &self,
        params: &[i64],
        compute_all_tile_offset_maps: bool,
    ) -> Result<TiledComputation, Diagnostic> {
        if params.len() != self.num_tile_parameters() {
            return Err(self.too_many(params.len()));
        }
        if !self.parameters_satisfy_constraints(params)? {
            let mut diag = Diagnostic::error(
                codes::E0402,
                format!("tile sizes {} violate the tiling constraints", fmt_dims(params)),
            );
            for violated in self.constraints.violations(&self.cx, params) {
                diag = diag.with_cause(violated, None);
            }
            return Err(diag.with_hint("use `--emit tilings` to list valid tile sizes"));
        }
        TiledComputation::materialize(self, params, compute_all_tile_offset_maps)
    }

    /// Tilings from the configured candidates that pass
    /// `parameters_satisfy_triton_constraints`.
    pub fn good_triton_tilings(&self, config: &TilingConfig) -> Result<Vec<Tiling>, Diagnostic> {
        try_good_tilings(self.root_shape(), &config.candidates, |tiling| {
            self.parameters_satisfy_triton_constraints(tiling, &config.triton)
        })
    }

    /// SHA-256 hex digest of the rendered analysis.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for SymbolicTileAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "analysis of '{}': {} nodes, {} tile parameters",
            self.computation.name,
            self.nodes.len(),
            self.num_tile_parameters()
        )?;
        for (i, node) in self.nodes.iter().enumerate() {
            let instr = self.instr(node);
            write!(f, "#{} {} = {}", i, instr.name, instr.kind.name())?;
            if !node.operands.is_empty() {
                let ops: Vec<String> = node.operands.iter().map(|o| format!("#{}", o)).collect();
                write!(f, "({})", ops.join(", "))?;
            }
            writeln!(f, " : {}", fmt_dims(&instr.shape))?;
            writeln!(f, "  offsets: {}", render_exprs(&self.cx, &node.tile.offsets()))?;
            writeln!(f, "  sizes:   {}", render_exprs(&self.cx, &node.tile.sizes()))?;
            writeln!(f, "  strides: {}", render_exprs(&self.cx, &node.tile.strides()))?;
            if !node.tile.constraints.is_always_satisfied() {
                writeln!(f, "  where:   {}", node.tile.constraints.display(&self.cx))?;
            }
        }
        writeln!(f, "constraints: {}", self.constraints.display(&self.cx))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
