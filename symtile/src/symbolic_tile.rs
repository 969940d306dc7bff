// symbolic_tile.rs — Symbolic tiles and per-operation tiling rules
//
// A symbolic tile describes, per dimension of an instruction's output, which
// block is read when one tile of the fusion root is computed: an offset over
// the tile indices `d*` and tile sizes `s*`, a size and a stride over `s*`.
// `operand_tiles` maps an instruction's tile to one tile per operand.
//
// Preconditions: the instruction belongs to a verified `Computation`; the tile
//                has one entry per output dimension.
// Postconditions: one tile per operand, each with the constraints its rule
//                 introduced (the caller accumulates them).
// Failure modes: operations without a rule (E0300, E0301), strided input to
//                a flattening reshape (E0302) and reshapes whose flattened
//                extent overflows (E0204).
// Side effects: interns expressions in the context.

use std::ops::Range;

use crate::constraint::{ConstraintExpression, Interval};
use crate::diag::{codes, Diagnostic};
use crate::expr::{ExprContext, ExprId};
use crate::graph::{Computation, Instruction, OpKind, OpaqueOp};

// ── Public types ────────────────────────────────────────────────────────────

/// Tile of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimTile {
    pub offset: ExprId,
    pub size: ExprId,
    pub stride: ExprId,
}

impl DimTile {
    /// Covers the whole dimension.
    pub fn full(cx: &ExprContext, extent: i64) -> Self {
        DimTile {
            offset: cx.constant(0),
            size: cx.constant(extent),
            stride: cx.constant(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicTile {
    pub dims: Vec<DimTile>,
    pub constraints: ConstraintExpression,
}

impl SymbolicTile {
    /// Tile of the fusion root: `offset_i = d_i * s_i`, `size_i = s_i`,
    /// unit strides.
    pub fn root(cx: &ExprContext, rank: usize) -> Self {
        let dims = (0..rank as u32)
            .map(|i| DimTile {
                offset: cx.mul(cx.dim(i), cx.symbol(i)),
                size: cx.symbol(i),
                stride: cx.constant(1),
            })
            .collect();
        SymbolicTile {
            dims,
            constraints: ConstraintExpression::always_satisfied(),
        }
    }

    fn unconstrained(dims: Vec<DimTile>) -> Self {
        SymbolicTile {
            dims,
            constraints: ConstraintExpression::always_satisfied(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn offsets(&self) -> Vec<ExprId> {
        self.dims.iter().map(|d| d.offset).collect()
    }

    pub fn sizes(&self) -> Vec<ExprId> {
        self.dims.iter().map(|d| d.size).collect()
    }

    pub fn strides(&self) -> Vec<ExprId> {
        self.dims.iter().map(|d| d.stride).collect()
    }

    /// Same offsets, sizes and strides (constraints are not compared).
    pub fn same_mapping(&self, other: &SymbolicTile) -> bool {
        self.dims == other.dims
    }
}

/// Render expressions as `(a, b, c)`.
pub fn render_exprs(cx: &ExprContext, exprs: &[ExprId]) -> String {
    let parts: Vec<String> = exprs.iter().map(|&e| cx.render(e)).collect();
    format!("({})", parts.join(", "))
}

// ── Tiling rules ────────────────────────────────────────────────────────────

/// Derive one tile per operand of `instr` from the tile of its output.
pub fn operand_tiles(
    cx: &ExprContext,
    comp: &Computation,
    instr: &Instruction,
    tile: &SymbolicTile,
) -> Result<Vec<SymbolicTile>, Diagnostic> {
    let operand_shape = |k: usize| comp.instr(instr.operands[k]).shape.as_slice();

    let tiles = match &instr.kind {
        OpKind::Parameter | OpKind::Constant | OpKind::Iota => Vec::new(),
        OpKind::Elementwise(_) => instr
            .operands
            .iter()
            .map(|_| SymbolicTile::unconstrained(tile.dims.clone()))
            .collect(),
        OpKind::Broadcast { dims } => {
            let mapped = dims.iter().map(|&d| tile.dims[d]).collect();
            vec![SymbolicTile::unconstrained(mapped)]
        }
        OpKind::Transpose { perm } => {
            let mut mapped = tile.dims.clone();
            for (i, &p) in perm.iter().enumerate() {
                mapped[p] = tile.dims[i];
            }
            vec![SymbolicTile::unconstrained(mapped)]
        }
        OpKind::Reduce { dims } => vec![reduce_tile(cx, operand_shape(0), dims, tile)],
        OpKind::Slice { start, stride, .. } => {
            let mapped = tile
                .dims
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let step = cx.constant(stride[i]);
                    DimTile {
                        offset: cx.add(cx.mul(t.offset, step), cx.constant(start[i])),
                        size: t.size,
                        stride: cx.mul(t.stride, step),
                    }
                })
                .collect();
            vec![SymbolicTile::unconstrained(mapped)]
        }
        OpKind::Reshape => vec![reshape_tile(cx, instr, operand_shape(0), tile)?],
        OpKind::Dot {
            lhs_contracting,
            rhs_contracting,
        } => {
            let (lhs, rhs) = (operand_shape(0), operand_shape(1));
            let mut out_dims = tile.dims.iter().copied();
            let mut side = |shape: &[i64], contracting: usize| -> Vec<DimTile> {
                (0..shape.len())
                    .map(|i| {
                        if i == contracting {
                            DimTile::full(cx, shape[i])
                        } else {
                            out_dims.next().unwrap_or_else(|| DimTile::full(cx, shape[i]))
                        }
                    })
                    .collect()
            };
            let lhs_tile = side(lhs, *lhs_contracting);
            let rhs_tile = side(rhs, *rhs_contracting);
            vec![
                SymbolicTile::unconstrained(lhs_tile),
                SymbolicTile::unconstrained(rhs_tile),
            ]
        }
        OpKind::Opaque(op) => return Err(unsupported(instr, *op)),
    };
    Ok(tiles)
}

fn unsupported(instr: &Instruction, op: OpaqueOp) -> Diagnostic {
    match op {
        OpaqueOp::Convolution | OpaqueOp::ReduceWindow => Diagnostic::error(
            codes::E0301,
            format!(
                "instruction '{}' ({}) reads overlapping windows and cannot be tiled",
                instr.name,
                op.name()
            ),
        ),
        _ => Diagnostic::error(
            codes::E0300,
            format!(
                "instruction '{}' ({}) has no symbolic tiling rule",
                instr.name,
                op.name()
            ),
        )
        .with_hint("split the fusion before this instruction"),
    }
}

/// Reduced dims are read fully; kept dims take the output tiles in order and
/// must be evenly partitioned by them.
fn reduce_tile(
    cx: &ExprContext,
    operand: &[i64],
    reduced: &[usize],
    tile: &SymbolicTile,
) -> SymbolicTile {
    let mut kept = tile.dims.iter();
    let mut constraints = ConstraintExpression::always_satisfied();
    let mut dims = Vec::with_capacity(operand.len());
    for (i, &extent) in operand.iter().enumerate() {
        let output_tile = if reduced.contains(&i) {
            None
        } else {
            kept.next()
        };
        match output_tile {
            Some(t) => {
                let divides = ConstraintExpression::divisible(cx, cx.constant(extent), t.size);
                constraints = constraints.and(&divides);
                dims.push(*t);
            }
            None => dims.push(DimTile::full(cx, extent)),
        }
    }
    SymbolicTile { dims, constraints }
}

// ── Reshape ─────────────────────────────────────────────────────────────────

/// A minimal run of operand dims and output dims with equal element counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshapeGroup {
    pub input: Range<usize>,
    pub output: Range<usize>,
}

/// Split a reshape into groups. Trailing unit dims join the last group.
pub fn reshape_groups(input: &[i64], output: &[i64]) -> Vec<ReshapeGroup> {
    let mut groups = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < input.len() && j < output.len() {
        let (si, sj) = (i, j);
        let (mut pi, mut pj) = (input[i], output[j]);
        i += 1;
        j += 1;
        while pi != pj {
            if pi < pj && i < input.len() {
                pi = pi.saturating_mul(input[i]);
                i += 1;
            } else if j < output.len() {
                pj = pj.saturating_mul(output[j]);
                j += 1;
            } else if i < input.len() {
                pi = pi.saturating_mul(input[i]);
                i += 1;
            } else {
                break;
            }
        }
        groups.push(ReshapeGroup {
            input: si..i,
            output: sj..j,
        });
    }
    match groups.last_mut() {
        Some(last) => {
            last.input.end = input.len();
            last.output.end = output.len();
        }
        None => groups.push(ReshapeGroup {
            input: 0..input.len(),
            output: 0..output.len(),
        }),
    }
    groups
}

fn reshape_tile(
    cx: &ExprContext,
    instr: &Instruction,
    input: &[i64],
    tile: &SymbolicTile,
) -> Result<SymbolicTile, Diagnostic> {
    let output = instr.shape.as_slice();
    let one = cx.constant(1);
    let unit = DimTile {
        offset: cx.constant(0),
        size: one,
        stride: one,
    };
    let mut dims = vec![unit; input.len()];
    let mut constraints = ConstraintExpression::always_satisfied();

    for group in reshape_groups(input, output) {
        let ins: Vec<usize> = group.input.filter(|&a| input[a] != 1).collect();
        let outs: Vec<usize> = group.output.filter(|&b| output[b] != 1).collect();

        match (ins.as_slice(), outs.as_slice()) {
            ([], _) => {}
            ([a], [b]) => dims[*a] = tile.dims[*b],
            _ => {
                if let Some(&b) = outs.iter().find(|&&b| cx.as_constant(tile.dims[b].stride) != Some(1)) {
                    return Err(Diagnostic::error(
                        codes::E0302,
                        format!(
                            "reshape '{}' would flatten a strided tile (output dim {} has stride {})",
                            instr.name,
                            b,
                            cx.render(tile.dims[b].stride)
                        ),
                    ));
                }

                // Flatten the output tiles of the group.
                let mut offset = cx.constant(0);
                let mut size = one;
                for (k, &b) in outs.iter().enumerate() {
                    let suffix = outs[k + 1..]
                        .iter()
                        .try_fold(1i64, |n, &m| n.checked_mul(output[m]))
                        .ok_or_else(|| {
                            Diagnostic::error(
                                codes::E0204,
                                format!("reshape '{}' has too many elements", instr.name),
                            )
                        })?;
                    let scaled = cx.mul(tile.dims[b].offset, cx.constant(suffix));
                    offset = cx.add(offset, scaled);
                    size = cx.mul(size, tile.dims[b].size);
                }
                constraints = constraints.and(&contiguity(cx, output, &outs, tile));

                // A shifted flat range must not straddle operand rows.
                let shift = cx.constant_term(offset);
                if shift != 0 {
                    constraints = constraints
                        .and(&ConstraintExpression::divisible(cx, cx.constant(shift), size));
                }

                // Split the flat tile over the operand dims, minor to major.
                for (pos, &a) in ins.iter().enumerate().rev() {
                    if pos == 0 {
                        dims[a] = DimTile {
                            offset,
                            size,
                            stride: one,
                        };
                        break;
                    }
                    let extent = cx.constant(input[a]);
                    let minor_size = cx.add(cx.modulo(cx.sub(size, one), extent), one);
                    dims[a] = DimTile {
                        offset: cx.modulo(offset, extent),
                        size: minor_size,
                        stride: one,
                    };
                    let nested = ConstraintExpression::divisible(cx, extent, size)
                        .or(&ConstraintExpression::divisible(cx, size, extent));
                    constraints = constraints.and(&nested);
                    offset = cx.floor_div(offset, extent);
                    size = cx.floor_div(cx.add(size, cx.constant(input[a] - 1)), extent);
                }
            }
        }
    }
    Ok(SymbolicTile { dims, constraints })
}

/// Some output dim `m` exists such that every more-minor dim is read fully
/// and every more-major dim has tile size 1.
fn contiguity(
    cx: &ExprContext,
    output: &[i64],
    outs: &[usize],
    tile: &SymbolicTile,
) -> ConstraintExpression {
    let mut any = ConstraintExpression::unsatisfiable();
    for m in 0..outs.len() {
        let mut all = ConstraintExpression::always_satisfied();
        for (k, &b) in outs.iter().enumerate() {
            let required = match k.cmp(&m) {
                std::cmp::Ordering::Less => Interval::point(1),
                std::cmp::Ordering::Greater => Interval::point(output[b]),
                std::cmp::Ordering::Equal => continue,
            };
            all = all.and(&ConstraintExpression::from_constraint(
                cx,
                tile.dims[b].size,
                required,
            ));
        }
        any = any.or(&all);
    }
    any
}

// ── Tests ───────────────────────────────────────────────────────────────────
