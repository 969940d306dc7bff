// graph.rs — Dataflow graph of a fusion
//
// Lowers a parsed `FusionDecl` into a verified `Computation`: instructions in
// definition order, each with an operation kind, an output shape and operand
// references, plus one designated root. The symbolic tile analysis consumes
// this graph read-only.
//
// Preconditions: `fusion` is a parsed AST.
// Postconditions: returns a `Computation` whose operands always refer to
//                 earlier instructions (acyclic by construction) and whose
//                 shapes satisfy the per-operation shape rules.
// Failure modes: undefined operands, duplicate names, missing/multiple ROOT,
//                unknown operations, invalid attributes or shapes and wrong
//                operand counts produce `Diagnostic` errors.
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ast::{FusionDecl, InstrDecl, Span};
use crate::diag::{codes, DiagLevel, Diagnostic};

// ── Public types ────────────────────────────────────────────────────────────

/// Index of an instruction within its computation (definition order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

/// Operations whose output element depends only on the same element of
/// every operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Power,
    Compare,
    And,
    Or,
    Select,
    Exp,
    Log,
    Negate,
    Abs,
    Tanh,
    Rsqrt,
    Sqrt,
    Convert,
    Copy,
}

const ELEMENTWISE_OPS: [ElementwiseOp; 20] = [
    ElementwiseOp::Add,
    ElementwiseOp::Subtract,
    ElementwiseOp::Multiply,
    ElementwiseOp::Divide,
    ElementwiseOp::Maximum,
    ElementwiseOp::Minimum,
    ElementwiseOp::Power,
    ElementwiseOp::Compare,
    ElementwiseOp::And,
    ElementwiseOp::Or,
    ElementwiseOp::Select,
    ElementwiseOp::Exp,
    ElementwiseOp::Log,
    ElementwiseOp::Negate,
    ElementwiseOp::Abs,
    ElementwiseOp::Tanh,
    ElementwiseOp::Rsqrt,
    ElementwiseOp::Sqrt,
    ElementwiseOp::Convert,
    ElementwiseOp::Copy,
];

impl ElementwiseOp {
    pub fn name(self) -> &'static str {
        match self {
            ElementwiseOp::Add => "add",
            ElementwiseOp::Subtract => "subtract",
            ElementwiseOp::Multiply => "multiply",
            ElementwiseOp::Divide => "divide",
            ElementwiseOp::Maximum => "maximum",
            ElementwiseOp::Minimum => "minimum",
            ElementwiseOp::Power => "power",
            ElementwiseOp::Compare => "compare",
            ElementwiseOp::And => "and",
            ElementwiseOp::Or => "or",
            ElementwiseOp::Select => "select",
            ElementwiseOp::Exp => "exp",
            ElementwiseOp::Log => "log",
            ElementwiseOp::Negate => "negate",
            ElementwiseOp::Abs => "abs",
            ElementwiseOp::Tanh => "tanh",
            ElementwiseOp::Rsqrt => "rsqrt",
            ElementwiseOp::Sqrt => "sqrt",
            ElementwiseOp::Convert => "convert",
            ElementwiseOp::Copy => "copy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ELEMENTWISE_OPS.iter().copied().find(|op| op.name() == name)
    }

    /// Number of operands the operation takes.
    pub fn arity(self) -> usize {
        match self {
            ElementwiseOp::Select => 3,
            ElementwiseOp::Add
            | ElementwiseOp::Subtract
            | ElementwiseOp::Multiply
            | ElementwiseOp::Divide
            | ElementwiseOp::Maximum
            | ElementwiseOp::Minimum
            | ElementwiseOp::Power
            | ElementwiseOp::Compare
            | ElementwiseOp::And
            | ElementwiseOp::Or => 2,
            _ => 1,
        }
    }
}

/// Operations the graph can represent but the tiling analysis has no
/// symbolic rule for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaqueOp {
    Concatenate,
    Gather,
    Scatter,
    Convolution,
    ReduceWindow,
    CustomCall,
}

const OPAQUE_OPS: [OpaqueOp; 6] = [
    OpaqueOp::Concatenate,
    OpaqueOp::Gather,
    OpaqueOp::Scatter,
    OpaqueOp::Convolution,
    OpaqueOp::ReduceWindow,
    OpaqueOp::CustomCall,
];

impl OpaqueOp {
    pub fn name(self) -> &'static str {
        match self {
            OpaqueOp::Concatenate => "concatenate",
            OpaqueOp::Gather => "gather",
            OpaqueOp::Scatter => "scatter",
            OpaqueOp::Convolution => "convolution",
            OpaqueOp::ReduceWindow => "reduce_window",
            OpaqueOp::CustomCall => "custom_call",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OPAQUE_OPS.iter().copied().find(|op| op.name() == name)
    }
}

/// The kind of an instruction, with the data its tiling rule needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    Parameter,
    Constant,
    Iota,
    Elementwise(ElementwiseOp),
    /// Operand dim `i` becomes output dim `dims[i]`.
    Broadcast {
        dims: Vec<usize>,
    },
    /// Output dim `i` is operand dim `perm[i]`.
    Transpose {
        perm: Vec<usize>,
    },
    /// Operand dims in `dims` are reduced away; the rest keep their order.
    Reduce {
        dims: Vec<usize>,
    },
    Slice {
        start: Vec<i64>,
        limit: Vec<i64>,
        stride: Vec<i64>,
    },
    Reshape,
    /// Single contracting dim per side, no batch dims.
    Dot {
        lhs_contracting: usize,
        rhs_contracting: usize,
    },
    Opaque(OpaqueOp),
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Parameter => "parameter",
            OpKind::Constant => "constant",
            OpKind::Iota => "iota",
            OpKind::Elementwise(op) => op.name(),
            OpKind::Broadcast { .. } => "broadcast",
            OpKind::Transpose { .. } => "transpose",
            OpKind::Reduce { .. } => "reduce",
            OpKind::Slice { .. } => "slice",
            OpKind::Reshape => "reshape",
            OpKind::Dot { .. } => "dot",
            OpKind::Opaque(op) => op.name(),
        }
    }

    /// Attributes in fusion text syntax (`{dims = [1]}`), or empty.
    pub fn attrs_string(&self) -> String {
        let usizes = |v: &[usize]| v.iter().map(|&d| d as i64).collect::<Vec<_>>();
        match self {
            OpKind::Broadcast { dims } | OpKind::Reduce { dims } => {
                format!("{{dims = {}}}", fmt_dims(&usizes(dims)))
            }
            OpKind::Transpose { perm } => format!("{{dims = {}}}", fmt_dims(&usizes(perm))),
            OpKind::Slice {
                start,
                limit,
                stride,
            } => format!(
                "{{start = {}, limit = {}, stride = {}}}",
                fmt_dims(start),
                fmt_dims(limit),
                fmt_dims(stride)
            ),
            OpKind::Dot {
                lhs_contracting,
                rhs_contracting,
            } => format!(
                "{{lhs_contracting = [{}], rhs_contracting = [{}]}}",
                lhs_contracting, rhs_contracting
            ),
            _ => String::new(),
        }
    }
}

/// One node of the dataflow graph.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstrId,
    pub name: String,
    pub kind: OpKind,
    pub shape: Vec<i64>,
    pub operands: Vec<InstrId>,
    pub span: Option<Span>,
}

impl Instruction {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// A verified fusion graph with a single root.
#[derive(Debug, Clone)]
pub struct Computation {
    pub name: String,
    instructions: Vec<Instruction>,
    root: InstrId,
}

impl Computation {
    /// Instructions in definition order (every operand precedes its users).
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.0 as usize]
    }

    pub fn root(&self) -> &Instruction {
        self.instr(self.root)
    }

    pub fn root_id(&self) -> InstrId {
        self.root
    }

    pub fn find(&self, name: &str) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Result of graph construction.
#[derive(Debug)]
pub struct GraphResult {
    /// `None` when any error-level diagnostic was produced.
    pub computation: Option<Computation>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Build a verified computation from a parsed fusion.
pub fn build_computation(fusion: &FusionDecl) -> GraphResult {
    let mut builder = ComputationBuilder::new(&fusion.name.name);
    let mut roots: Vec<(InstrId, Span)> = Vec::new();

    for decl in &fusion.instructions {
        let Some(id) = builder.lower_decl(decl) else {
            continue;
        };
        if decl.is_root {
            roots.push((id, decl.span));
        }
    }

    match roots.as_slice() {
        [] => builder.error(
            Diagnostic::error(
                codes::E0202,
                format!("fusion '{}' has no ROOT instruction", fusion.name.name),
            )
            .with_span(fusion.name.span)
            .with_hint("mark the output instruction with `ROOT`"),
        ),
        [(id, _)] => builder.set_root(*id),
        [(_, first), rest @ ..] => {
            let mut diag = Diagnostic::error(
                codes::E0202,
                format!("fusion '{}' has {} ROOT instructions", fusion.name.name, roots.len()),
            )
            .with_span(*first);
            for (_, span) in rest {
                diag = diag.with_cause("another ROOT declared here", Some(*span));
            }
            builder.error(diag);
        }
    }

    builder.finish()
}

/// Parse and build a computation from fusion text in one step.
pub fn computation_from_text(source: &str) -> GraphResult {
    let parsed = crate::parser::parse(source);
    let mut diagnostics = parsed.diagnostics();
    let Some(fusion) = parsed.fusion else {
        return GraphResult {
            computation: None,
            diagnostics,
        };
    };
    if !diagnostics.is_empty() {
        return GraphResult {
            computation: None,
            diagnostics,
        };
    }
    let mut result = build_computation(&fusion);
    diagnostics.append(&mut result.diagnostics);
    GraphResult {
        computation: result.computation,
        diagnostics,
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Incremental, verifying construction of a `Computation`.
///
/// Used by the text front-end and directly by tests and benchmarks.
#[derive(Debug)]
pub struct ComputationBuilder {
    name: String,
    instructions: Vec<Instruction>,
    names: HashMap<String, InstrId>,
    root: Option<InstrId>,
    diagnostics: Vec<Diagnostic>,
}

impl ComputationBuilder {
    pub fn new(name: &str) -> Self {
        ComputationBuilder {
            name: name.to_string(),
            instructions: Vec::new(),
            names: HashMap::new(),
            root: None,
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    /// Append an instruction. Shape rules are checked immediately; a
    /// violation is recorded as a diagnostic and the instruction is still
    /// added so later references resolve.
    pub fn add(
        &mut self,
        name: &str,
        kind: OpKind,
        shape: &[i64],
        operands: &[InstrId],
    ) -> InstrId {
        self.add_with_span(name, kind, shape, operands, None)
    }

    fn add_with_span(
        &mut self,
        name: &str,
        kind: OpKind,
        shape: &[i64],
        operands: &[InstrId],
        span: Option<Span>,
    ) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        let instr = Instruction {
            id,
            name: name.to_string(),
            kind,
            shape: shape.to_vec(),
            operands: operands.to_vec(),
            span,
        };
        if let Err(message) = verify_instruction(&instr, &self.instructions) {
            let code = if message.starts_with("expected") {
                codes::E0205
            } else {
                codes::E0204
            };
            let mut diag = Diagnostic::error(code, format!("instruction '{}': {}", name, message));
            if let Some(span) = span {
                diag = diag.with_span(span);
            }
            self.error(diag);
        }
        if self.names.insert(name.to_string(), id).is_some() {
            let mut diag = Diagnostic::error(
                codes::E0201,
                format!("instruction '{}' is defined more than once", name),
            );
            if let Some(span) = span {
                diag = diag.with_span(span);
            }
            self.error(diag);
        }
        self.instructions.push(instr);
        id
    }

    pub fn set_root(&mut self, id: InstrId) {
        self.root = Some(id);
    }

    /// Finish construction: requires a root, warns about instructions the
    /// root does not depend on.
    pub fn finish(mut self) -> GraphResult {
        let Some(root) = self.root else {
            if !self.diagnostics.iter().any(|d| d.code == Some(codes::E0202)) {
                self.error(Diagnostic::error(
                    codes::E0202,
                    format!("fusion '{}' has no ROOT instruction", self.name),
                ));
            }
            return GraphResult {
                computation: None,
                diagnostics: self.diagnostics,
            };
        };

        let reachable = reachable_from(&self.instructions, root);
        for instr in &self.instructions {
            if !reachable.contains(&instr.id) {
                let mut diag = Diagnostic::new(
                    DiagLevel::Warning,
                    format!("instruction '{}' is unreachable from ROOT", instr.name),
                )
                .with_code(codes::W0200);
                if let Some(span) = instr.span {
                    diag = diag.with_span(span);
                }
                self.diagnostics.push(diag);
            }
        }

        let has_error = self.diagnostics.iter().any(|d| d.is_error());
        GraphResult {
            computation: (!has_error).then(|| Computation {
                name: self.name,
                instructions: self.instructions,
                root,
            }),
            diagnostics: self.diagnostics,
        }
    }

    // ── Text lowering ───────────────────────────────────────────────────

    fn lower_decl(&mut self, decl: &InstrDecl) -> Option<InstrId> {
        let mut operands = Vec::with_capacity(decl.operands.len());
        for operand in &decl.operands {
            match self.names.get(&operand.name) {
                Some(&id) => operands.push(id),
                None => {
                    self.error(
                        Diagnostic::error(
                            codes::E0200,
                            format!(
                                "instruction '{}' uses undefined operand '{}'",
                                decl.name.name, operand.name
                            ),
                        )
                        .with_span(operand.span)
                        .with_hint("operands must be defined before they are used"),
                    );
                    return None;
                }
            }
        }

        let kind = match op_kind_from_decl(decl) {
            Ok(kind) => kind,
            Err(diag) => {
                self.error(diag);
                return None;
            }
        };

        Some(self.add_with_span(
            &decl.name.name,
            kind,
            &decl.shape.dims,
            &operands,
            Some(decl.span),
        ))
    }
}

fn op_kind_from_decl(decl: &InstrDecl) -> Result<OpKind, Diagnostic> {
    let op = decl.op.name.as_str();
    let allowed: &[&str] = match op {
        "broadcast" | "transpose" | "reduce" => &["dims"],
        "slice" => &["start", "limit", "stride"],
        "dot" => &["lhs_contracting", "rhs_contracting"],
        _ => &[],
    };
    if let Some(attr) = decl.attrs.iter().find(|a| !allowed.contains(&a.name.name.as_str())) {
        return Err(Diagnostic::error(
            codes::E0204,
            format!("'{}' does not accept attribute '{}'", op, attr.name.name),
        )
        .with_span(attr.span));
    }

    let required = |name: &str| -> Result<Vec<i64>, Diagnostic> {
        decl.attr(name).map(|a| a.values.clone()).ok_or_else(|| {
            Diagnostic::error(
                codes::E0204,
                format!("'{}' requires attribute '{}'", op, name),
            )
            .with_span(decl.span)
        })
    };
    let indices = |name: &str| -> Result<Vec<usize>, Diagnostic> {
        let values = required(name)?;
        values
            .iter()
            .map(|&v| usize::try_from(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                Diagnostic::error(
                    codes::E0204,
                    format!("attribute '{}' of '{}' must be non-negative", name, decl.name.name),
                )
                .with_span(decl.span)
            })
    };
    let single = |name: &str| -> Result<usize, Diagnostic> {
        match indices(name)?.as_slice() {
            [v] => Ok(*v),
            _ => Err(Diagnostic::error(
                codes::E0204,
                format!("attribute '{}' of '{}' must hold exactly one value", name, decl.name.name),
            )
            .with_span(decl.span)),
        }
    };

    let kind = match op {
        "parameter" => OpKind::Parameter,
        "constant" => OpKind::Constant,
        "iota" => OpKind::Iota,
        "reshape" => OpKind::Reshape,
        "broadcast" => OpKind::Broadcast {
            dims: indices("dims")?,
        },
        "transpose" => OpKind::Transpose {
            perm: indices("dims")?,
        },
        "reduce" => OpKind::Reduce {
            dims: indices("dims")?,
        },
        "slice" => {
            let start = required("start")?;
            let limit = required("limit")?;
            let stride = match decl.attr("stride") {
                Some(a) => a.values.clone(),
                None => vec![1; start.len()],
            };
            OpKind::Slice {
                start,
                limit,
                stride,
            }
        }
        "dot" => OpKind::Dot {
            lhs_contracting: single("lhs_contracting")?,
            rhs_contracting: single("rhs_contracting")?,
        },
        other => {
            if let Some(op) = ElementwiseOp::from_name(other) {
                OpKind::Elementwise(op)
            } else if let Some(op) = OpaqueOp::from_name(other) {
                OpKind::Opaque(op)
            } else {
                return Err(Diagnostic::error(
                    codes::E0203,
                    format!("unknown operation '{}'", other),
                )
                .with_span(decl.op.span));
            }
        }
    };
    Ok(kind)
}

// ── Verification ────────────────────────────────────────────────────────────

/// Check operand count and shape rules of `instr` against already-defined
/// instructions. Messages about operand counts start with "expected".
fn verify_instruction(instr: &Instruction, defined: &[Instruction]) -> Result<(), String> {
    if let Some(&d) = instr.shape.iter().find(|&&d| d < 0) {
        return Err(format!("negative dimension {} in shape", d));
    }
    if nonzero_volume(&instr.shape).is_none() {
        return Err(format!("shape {} has too many elements", fmt_dims(&instr.shape)));
    }
    let mut operand_shapes = Vec::with_capacity(instr.operands.len());
    for operand in &instr.operands {
        match defined.get(operand.0 as usize) {
            Some(def) => operand_shapes.push(def.shape.as_slice()),
            None => return Err(format!("operand #{} is not defined yet", operand.0)),
        }
    }
    let expect_operands = |n: usize| -> Result<(), String> {
        if operand_shapes.len() == n {
            Ok(())
        } else {
            Err(format!(
                "expected {} operand(s) for '{}', found {}",
                n,
                instr.kind.name(),
                operand_shapes.len()
            ))
        }
    };
    let out = instr.shape.as_slice();

    match &instr.kind {
        OpKind::Parameter | OpKind::Constant | OpKind::Iota => expect_operands(0),
        OpKind::Elementwise(op) => {
            expect_operands(op.arity())?;
            match operand_shapes.iter().position(|s| *s != out) {
                Some(i) => Err(format!(
                    "operand #{} has shape {} but the result has shape {}",
                    i,
                    fmt_dims(operand_shapes[i]),
                    fmt_dims(out)
                )),
                None => Ok(()),
            }
        }
        OpKind::Broadcast { dims } => {
            expect_operands(1)?;
            let operand = operand_shapes[0];
            if dims.len() != operand.len() {
                return Err(format!(
                    "broadcast dims {:?} do not match operand rank {}",
                    dims,
                    operand.len()
                ));
            }
            if !is_distinct(dims) {
                return Err(format!("broadcast dims {:?} repeat a dimension", dims));
            }
            for (i, &d) in dims.iter().enumerate() {
                if d >= out.len() || out[d] != operand[i] {
                    return Err(format!(
                        "broadcast maps operand dim {} (size {}) to an incompatible result dim {}",
                        i, operand[i], d
                    ));
                }
            }
            Ok(())
        }
        OpKind::Transpose { perm } => {
            expect_operands(1)?;
            let operand = operand_shapes[0];
            if perm.len() != operand.len() || !is_permutation(perm) {
                return Err(format!("{:?} is not a permutation of the operand dims", perm));
            }
            if perm.iter().zip(out).any(|(&p, &o)| operand[p] != o) || out.len() != perm.len() {
                return Err(format!(
                    "transpose of {} by {:?} does not produce {}",
                    fmt_dims(operand),
                    perm,
                    fmt_dims(out)
                ));
            }
            Ok(())
        }
        OpKind::Reduce { dims } => {
            expect_operands(1)?;
            let operand = operand_shapes[0];
            if !is_distinct(dims) || dims.iter().any(|&d| d >= operand.len()) {
                return Err(format!("invalid reduce dims {:?}", dims));
            }
            let kept: Vec<i64> = operand
                .iter()
                .enumerate()
                .filter(|(i, _)| !dims.contains(i))
                .map(|(_, &d)| d)
                .collect();
            if kept != out {
                return Err(format!(
                    "reducing {} over {:?} gives {}, not {}",
                    fmt_dims(operand),
                    dims,
                    fmt_dims(&kept),
                    fmt_dims(out)
                ));
            }
            Ok(())
        }
        OpKind::Slice {
            start,
            limit,
            stride,
        } => {
            expect_operands(1)?;
            let operand = operand_shapes[0];
            let rank = operand.len();
            if start.len() != rank || limit.len() != rank || stride.len() != rank {
                return Err(format!("slice attributes must all have {} entries", rank));
            }
            if out.len() != rank {
                return Err(format!("slice result must have rank {}", rank));
            }
            for i in 0..rank {
                if start[i] < 0 || start[i] > limit[i] || limit[i] > operand[i] || stride[i] < 1 {
                    return Err(format!(
                        "slice bounds [{}, {}) step {} invalid for dim {} of size {}",
                        start[i], limit[i], stride[i], i, operand[i]
                    ));
                }
                let span = limit[i] - start[i];
                let expected = if span == 0 { 0 } else { (span - 1) / stride[i] + 1 };
                if out[i] != expected {
                    return Err(format!(
                        "slice dim {} has {} elements, result declares {}",
                        i, expected, out[i]
                    ));
                }
            }
            Ok(())
        }
        OpKind::Reshape => {
            expect_operands(1)?;
            let operand = operand_shapes[0];
            match (num_elements(operand), num_elements(out)) {
                (Some(a), Some(b)) if a == b => Ok(()),
                (a, b) => Err(format!(
                    "cannot reshape {} ({} elements) to {} ({} elements)",
                    fmt_dims(operand),
                    fmt_count(a),
                    fmt_dims(out),
                    fmt_count(b)
                )),
            }
        }
        OpKind::Dot {
            lhs_contracting,
            rhs_contracting,
        } => {
            expect_operands(2)?;
            let (lhs, rhs) = (operand_shapes[0], operand_shapes[1]);
            if *lhs_contracting >= lhs.len() || *rhs_contracting >= rhs.len() {
                return Err("contracting dimension out of range".to_string());
            }
            if lhs[*lhs_contracting] != rhs[*rhs_contracting] {
                return Err(format!(
                    "contracting dims differ in size ({} vs {})",
                    lhs[*lhs_contracting], rhs[*rhs_contracting]
                ));
            }
            let expected: Vec<i64> = lhs
                .iter()
                .enumerate()
                .filter(|(i, _)| i != lhs_contracting)
                .chain(rhs.iter().enumerate().filter(|(i, _)| i != rhs_contracting))
                .map(|(_, &d)| d)
                .collect();
            if expected != out {
                return Err(format!(
                    "dot result should be {}, declared {}",
                    fmt_dims(&expected),
                    fmt_dims(out)
                ));
            }
            Ok(())
        }
        OpKind::Opaque(_) => Ok(()),
    }
}

fn is_distinct(dims: &[usize]) -> bool {
    let mut seen = HashSet::with_capacity(dims.len());
    dims.iter().all(|d| seen.insert(*d))
}

fn is_permutation(perm: &[usize]) -> bool {
    is_distinct(perm) && perm.iter().all(|&p| p < perm.len())
}

/// Element count, or `None` on overflow.
fn num_elements(shape: &[i64]) -> Option<i64> {
    shape.iter().try_fold(1i64, |n, &d| n.checked_mul(d))
}

/// Product of the non-zero dims. Any sub-product of a verified shape fits in
/// an `i64` when this does.
fn nonzero_volume(shape: &[i64]) -> Option<i64> {
    num_elements(&shape.iter().copied().filter(|&d| d != 0).collect::<Vec<_>>())
}

fn fmt_count(count: Option<i64>) -> String {
    count.map_or_else(|| "too many".to_string(), |n| n.to_string())
}

fn reachable_from(instructions: &[Instruction], root: InstrId) -> HashSet<InstrId> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if seen.insert(id) {
            stack.extend(instructions[id.0 as usize].operands.iter().copied());
        }
    }
    seen
}

/// Render a shape or integer list as `[a, b, c]`.
pub fn fmt_dims(dims: &[i64]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.kind.name())?;
        if !self.operands.is_empty() {
            let ops: Vec<String> = self.operands.iter().map(|o| format!("#{}", o.0)).collect();
            write!(f, "({})", ops.join(", "))?;
        }
        let attrs = self.kind.attrs_string();
        if !attrs.is_empty() {
            write!(f, " {}", attrs)?;
        }
        write!(f, " : {}", fmt_dims(&self.shape))
    }
}

/// Renders the computation back in fusion text syntax.
impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fusion {} {{", self.name)?;
        for instr in &self.instructions {
            write!(f, "  ")?;
            if instr.id == self.root {
                write!(f, "ROOT ")?;
            }
            write!(f, "{} = {}", instr.name, instr.kind.name())?;
            if !instr.operands.is_empty() {
                let names: Vec<&str> = instr
                    .operands
                    .iter()
                    .map(|&o| self.instr(o).name.as_str())
                    .collect();
                write!(f, "({})", names.join(", "))?;
            }
            let attrs = instr.kind.attrs_string();
            if !attrs.is_empty() {
                write!(f, " {}", attrs)?;
            }
            writeln!(f, " : {}", fmt_dims(&instr.shape))?;
        }
        writeln!(f, "}}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
