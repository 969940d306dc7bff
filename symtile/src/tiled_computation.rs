// tiled_computation.rs — Concrete tiled computation
//
// Evaluates every symbolic tile of an analysis at one concrete tile-size
// vector. Sizes and strides become integers; offsets become maps over the
// tile indices `d*` only. Nodes that agree on instruction, sizes, strides
// and offsets are merged.
//
// Preconditions: `params` satisfy the analysis constraints (checked by
//                `SymbolicTileAnalysis::compute_tiled_instructions`).
// Postconditions: nodes are in def-before-use order with the root last.
// Failure modes: a tile expression that cannot be evaluated (E0402).
// Side effects: interns the concretized offset expressions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::analysis::SymbolicTileAnalysis;
use crate::diag::{codes, Diagnostic};
use crate::expr::{EvalError, ExprContext, ExprId};
use crate::graph::{fmt_dims, InstrId};
use crate::symbolic_tile::render_exprs;
use crate::tiled_node::SymbolicTiledNode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledNode {
    pub instr: InstrId,
    pub name: String,
    pub op: &'static str,
    pub tile_sizes: Vec<i64>,
    pub tile_strides: Vec<i64>,
    /// Offsets over `d*`; `None` unless requested or needed for merging.
    pub tile_offsets: Option<Vec<ExprId>>,
    pub operands: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TiledComputation {
    cx: Arc<ExprContext>,
    name: String,
    tile_sizes: Vec<i64>,
    num_tiles: Vec<i64>,
    nodes: Vec<TiledNode>,
}

type ConcreteKey = (InstrId, Vec<i64>, Vec<i64>);

impl TiledComputation {
    pub(crate) fn materialize(
        analysis: &SymbolicTileAnalysis,
        params: &[i64],
        compute_all_tile_offset_maps: bool,
    ) -> Result<Self, Diagnostic> {
        let cx = analysis.context();
        let symbolic = analysis.nodes();

        let mut nodes: Vec<TiledNode> = Vec::with_capacity(symbolic.len());
        let mut source: Vec<usize> = Vec::with_capacity(symbolic.len());
        let mut remap: Vec<usize> = Vec::with_capacity(symbolic.len());
        let mut by_key: HashMap<ConcreteKey, Vec<usize>> = HashMap::new();

        for (i, node) in symbolic.iter().enumerate() {
            let name = &analysis.instr(node).name;
            let tile_sizes = evaluate_all(cx, &node.tile.sizes(), params, name)?;
            let tile_strides = evaluate_all(cx, &node.tile.strides(), params, name)?;
            let mut offsets =
                compute_all_tile_offset_maps.then(|| offset_map(cx, node, params));

            let candidates = by_key
                .entry((node.instr, tile_sizes.clone(), tile_strides.clone()))
                .or_default();
            let mut merged_into = None;
            if !candidates.is_empty() {
                let mine = offsets
                    .get_or_insert_with(|| offset_map(cx, node, params))
                    .clone();
                for &c in candidates.iter() {
                    let theirs = nodes[c]
                        .tile_offsets
                        .get_or_insert_with(|| offset_map(cx, &symbolic[source[c]], params));
                    if *theirs == mine {
                        merged_into = Some(c);
                        break;
                    }
                }
            }

            match merged_into {
                Some(c) => remap.push(c),
                None => {
                    let index = nodes.len();
                    candidates.push(index);
                    remap.push(index);
                    source.push(i);
                    nodes.push(TiledNode {
                        instr: node.instr,
                        name: name.clone(),
                        op: analysis.instr(node).kind.name(),
                        tile_sizes,
                        tile_strides,
                        tile_offsets: offsets,
                        operands: node.operands.iter().map(|&o| remap[o]).collect(),
                    });
                }
            }
        }

        let num_tiles = analysis
            .root_shape()
            .iter()
            .zip(params)
            .map(|(&dim, &size)| (dim + size - 1) / size)
            .collect();

        Ok(TiledComputation {
            cx: Arc::clone(cx),
            name: analysis.computation().name.clone(),
            tile_sizes: params.to_vec(),
            num_tiles,
            nodes,
        })
    }

    pub fn nodes(&self) -> &[TiledNode] {
        &self.nodes
    }

    pub fn root(&self) -> &TiledNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn tile_sizes(&self) -> &[i64] {
        &self.tile_sizes
    }

    /// Number of tiles along each root dimension.
    pub fn num_tiles(&self) -> &[i64] {
        &self.num_tiles
    }

    pub fn total_tiles(&self) -> i64 {
        self.num_tiles.iter().product()
    }

    /// Offsets of `node`'s tile for the root tile at `tile_index`, or `None`
    /// when its offset map was not computed.
    pub fn offsets_at(
        &self,
        node: &TiledNode,
        tile_index: &[i64],
    ) -> Option<Result<Vec<i64>, EvalError>> {
        let offsets = node.tile_offsets.as_ref()?;
        Some(
            offsets
                .iter()
                .map(|&o| self.cx.evaluate(o, tile_index, &[]))
                .collect(),
        )
    }
}

fn offset_map(cx: &ExprContext, node: &SymbolicTiledNode, params: &[i64]) -> Vec<ExprId> {
    node.tile
        .offsets()
        .iter()
        .map(|&o| cx.bind_symbols(o, params))
        .collect()
}

fn evaluate_all(
    cx: &ExprContext,
    exprs: &[ExprId],
    params: &[i64],
    name: &str,
) -> Result<Vec<i64>, Diagnostic> {
    exprs
        .iter()
        .map(|&e| {
            cx.evaluate(e, &[], params).map_err(|err| {
                Diagnostic::error(
                    codes::E0402,
                    format!(
                        "tile of '{}' cannot be evaluated at {}: {}",
                        name,
                        fmt_dims(params),
                        err
                    ),
                )
            })
        })
        .collect()
}

impl fmt::Display for TiledComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<String> = self.num_tiles.iter().map(|n| n.to_string()).collect();
        writeln!(
            f,
            "tiled '{}' at tile sizes {}: {} tiles ({})",
            self.name,
            fmt_dims(&self.tile_sizes),
            self.total_tiles(),
            counts.join(" x ")
        )?;
        for (i, node) in self.nodes.iter().enumerate() {
            write!(f, "#{} {} = {}", i, node.name, node.op)?;
            if !node.operands.is_empty() {
                let ops: Vec<String> = node.operands.iter().map(|o| format!("#{}", o)).collect();
                write!(f, "({})", ops.join(", "))?;
            }
            writeln!(f)?;
            writeln!(f, "  sizes:   {}", fmt_dims(&node.tile_sizes))?;
            writeln!(f, "  strides: {}", fmt_dims(&node.tile_strides))?;
            if let Some(offsets) = &node.tile_offsets {
                writeln!(f, "  offsets: {}", render_exprs(&self.cx, offsets))?;
            }
        }
        Ok(())
    }
}
