// expr.rs — Interned symbolic index expressions
//
// Quasi-affine integer expressions over tile-index variables (`d0..dn`) and
// tile-size parameters (`s0..sn`), built from constants, `+`, `*`,
// `floordiv` and `mod`. Nodes are hash-consed in an `ExprContext`, so equal
// expressions built through the smart constructors share one `ExprId` and
// structural equality is id equality.
//
// Preconditions: every `ExprId` passed to a context was produced by it.
// Postconditions: smart constructors return canonical, partially simplified
//                 expressions; `evaluate` never panics.
// Failure modes: evaluation reports unbound variables, division by zero and
//                arithmetic overflow as `EvalError`.
// Side effects: interning takes the context's write lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ── Public types ────────────────────────────────────────────────────────────

/// Handle to an interned expression. Only meaningful with its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One interned node. Binary operands refer to earlier nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprNode {
    Const(i64),
    /// Tile index `d{i}`.
    Dim(u32),
    /// Tile-size parameter `s{i}`.
    Sym(u32),
    Add(ExprId, ExprId),
    Mul(ExprId, ExprId),
    FloorDiv(ExprId, ExprId),
    Mod(ExprId, ExprId),
}

/// A free variable of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    Dim(u32),
    Sym(u32),
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Dim(i) => write!(f, "d{}", i),
            Var::Sym(i) => write!(f, "s{}", i),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    /// No value was supplied for the variable.
    Unbound(Var),
    DivisionByZero,
    Overflow,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Unbound(v) => write!(f, "no value bound for '{}'", v),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Overflow => write!(f, "integer overflow"),
        }
    }
}

/// Interning store for expressions. Share it across analyses with `Arc`.
#[derive(Debug, Default)]
pub struct ExprContext {
    interner: RwLock<Interner>,
}

#[derive(Debug, Default)]
struct Interner {
    nodes: Vec<ExprNode>,
    index: HashMap<ExprNode, ExprId>,
}

// ── Context ─────────────────────────────────────────────────────────────────

impl ExprContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Interner> {
        self.interner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Interner> {
        self.interner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn intern(&self, node: ExprNode) -> ExprId {
        let existing = self.read().index.get(&node).copied();
        if let Some(id) = existing {
            return id;
        }
        let mut interner = self.write();
        if let Some(&id) = interner.index.get(&node) {
            return id;
        }
        let id = ExprId(interner.nodes.len() as u32);
        interner.nodes.push(node);
        interner.index.insert(node, id);
        id
    }

    pub fn node(&self, id: ExprId) -> ExprNode {
        self.read().nodes[id.index()]
    }

    /// Number of distinct interned nodes.
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_constant(&self, id: ExprId) -> Option<i64> {
        match self.node(id) {
            ExprNode::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Constant term of a canonical sum: `x + c` gives `c`, a bare constant
    /// gives itself, anything else gives 0.
    pub fn constant_term(&self, id: ExprId) -> i64 {
        match self.node(id) {
            ExprNode::Const(v) => v,
            ExprNode::Add(_, c) => self.as_constant(c).unwrap_or(0),
            _ => 0,
        }
    }

    // ── Leaves ──────────────────────────────────────────────────────────

    pub fn constant(&self, value: i64) -> ExprId {
        self.intern(ExprNode::Const(value))
    }

    pub fn dim(&self, index: u32) -> ExprId {
        self.intern(ExprNode::Dim(index))
    }

    pub fn symbol(&self, index: u32) -> ExprId {
        self.intern(ExprNode::Sym(index))
    }

    // ── Smart constructors ──────────────────────────────────────────────

    /// Canonical order for commutative operands: constants, dims, symbols,
    /// then compound nodes by creation order.
    fn order_key(&self, id: ExprId) -> (u8, i64) {
        match self.node(id) {
            ExprNode::Const(v) => (0, v),
            ExprNode::Dim(i) => (1, i64::from(i)),
            ExprNode::Sym(i) => (2, i64::from(i)),
            _ => (3, i64::from(id.0)),
        }
    }

    /// Orders `(a, b)` so that a constant, if any, is on the right and the
    /// remaining operands follow `order_key`.
    fn canonical_pair(&self, a: ExprId, b: ExprId) -> (ExprId, ExprId) {
        let (ka, kb) = (self.order_key(a), self.order_key(b));
        let swap = match (ka.0, kb.0) {
            (0, 0) => false,
            (0, _) => true,
            (_, 0) => false,
            _ => ka > kb,
        };
        if swap {
            (b, a)
        } else {
            (a, b)
        }
    }

    pub fn add(&self, a: ExprId, b: ExprId) -> ExprId {
        if let (ExprNode::Const(x), ExprNode::Const(y)) = (self.node(a), self.node(b)) {
            if let Some(v) = x.checked_add(y) {
                return self.constant(v);
            }
        }
        let (a, b) = self.canonical_pair(a, b);
        let (na, nb) = (self.node(a), self.node(b));

        if let ExprNode::Const(c2) = nb {
            if c2 == 0 {
                return a;
            }
            // (x + c1) + c2 -> x + (c1 + c2)
            if let ExprNode::Add(x, y) = na {
                if let Some(c1) = self.as_constant(y) {
                    if let Some(c) = c1.checked_add(c2) {
                        return self.add(x, self.constant(c));
                    }
                }
            }
        } else if let ExprNode::Add(y, c) = nb {
            // a + (y + c) -> (a + y) + c
            if self.as_constant(c).is_some() {
                return self.add(self.add(a, y), c);
            }
        }
        self.intern(ExprNode::Add(a, b))
    }

    pub fn sub(&self, a: ExprId, b: ExprId) -> ExprId {
        self.add(a, self.mul(b, self.constant(-1)))
    }

    pub fn mul(&self, a: ExprId, b: ExprId) -> ExprId {
        if let (ExprNode::Const(x), ExprNode::Const(y)) = (self.node(a), self.node(b)) {
            if let Some(v) = x.checked_mul(y) {
                return self.constant(v);
            }
        }
        let (a, b) = self.canonical_pair(a, b);
        let (na, nb) = (self.node(a), self.node(b));

        if let ExprNode::Const(c2) = nb {
            match c2 {
                0 => return b,
                1 => return a,
                _ => {}
            }
            match na {
                // (x * c1) * c2 -> x * (c1 * c2)
                ExprNode::Mul(x, y) => {
                    if let Some(c) = self.as_constant(y).and_then(|c1| c1.checked_mul(c2)) {
                        return self.mul(x, self.constant(c));
                    }
                }
                // (x + y) * c -> x * c + y * c
                ExprNode::Add(x, y) => {
                    return self.add(self.mul(x, b), self.mul(y, b));
                }
                _ => {}
            }
        } else if let ExprNode::Mul(y, c) = nb {
            // a * (y * c) -> (a * y) * c
            if self.as_constant(c).is_some() {
                return self.mul(self.mul(a, y), c);
            }
        }
        self.intern(ExprNode::Mul(a, b))
    }

    pub fn floor_div(&self, a: ExprId, b: ExprId) -> ExprId {
        let (na, nb) = (self.node(a), self.node(b));
        if let ExprNode::Const(cb) = nb {
            if cb == 1 {
                return a;
            }
            if let ExprNode::Const(ca) = na {
                if let Some(v) = floor_div_i64(ca, cb) {
                    return self.constant(v);
                }
            }
            if cb > 0 {
                match na {
                    ExprNode::Mul(x, y) => {
                        if let Some(ca) = self.as_constant(y) {
                            if ca % cb == 0 {
                                return self.mul(x, self.constant(ca / cb));
                            }
                            if ca > 0 && cb % ca == 0 {
                                return self.floor_div(x, self.constant(cb / ca));
                            }
                        }
                    }
                    ExprNode::FloorDiv(x, y) => {
                        let inner = self.as_constant(y).filter(|&c1| c1 > 0);
                        if let Some(c) = inner.and_then(|c1| c1.checked_mul(cb)) {
                            return self.floor_div(x, self.constant(c));
                        }
                    }
                    ExprNode::Add(x, y) => {
                        if self.is_multiple_of(x, cb) {
                            let q = self.exact_quotient(x, cb);
                            return self.add(q, self.floor_div(y, b));
                        }
                        if self.is_multiple_of(y, cb) {
                            let q = self.exact_quotient(y, cb);
                            return self.add(self.floor_div(x, b), q);
                        }
                    }
                    _ => {}
                }
            }
        }
        if na == ExprNode::Const(0) {
            return a;
        }
        self.intern(ExprNode::FloorDiv(a, b))
    }

    pub fn modulo(&self, a: ExprId, b: ExprId) -> ExprId {
        let (na, nb) = (self.node(a), self.node(b));
        if let ExprNode::Const(cb) = nb {
            if cb == 1 || cb == -1 {
                return self.constant(0);
            }
            if let ExprNode::Const(ca) = na {
                if let Some(v) = floor_mod_i64(ca, cb) {
                    return self.constant(v);
                }
            }
            if cb > 0 {
                match na {
                    ExprNode::Mul(x, y) => {
                        if let Some(ca) = self.as_constant(y) {
                            if ca % cb == 0 {
                                return self.constant(0);
                            }
                            if ca > 0 && cb % ca == 0 {
                                let inner = self.modulo(x, self.constant(cb / ca));
                                return self.mul(inner, y);
                            }
                        }
                    }
                    ExprNode::Add(x, y) => {
                        if self.is_multiple_of(x, cb) {
                            return self.modulo(y, b);
                        }
                        if self.is_multiple_of(y, cb) {
                            return self.modulo(x, b);
                        }
                    }
                    ExprNode::Mod(x, y) => {
                        if let Some(c1) = self.as_constant(y) {
                            if c1 > 0 && c1 % cb == 0 {
                                return self.modulo(x, b);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if na == ExprNode::Const(0) {
            return a;
        }
        self.intern(ExprNode::Mod(a, b))
    }

    /// True when `id` is syntactically a multiple of the positive constant `c`.
    fn is_multiple_of(&self, id: ExprId, c: i64) -> bool {
        match self.node(id) {
            ExprNode::Const(v) => v % c == 0,
            ExprNode::Mul(_, y) => self.as_constant(y).is_some_and(|k| k % c == 0),
            ExprNode::Add(x, y) => self.is_multiple_of(x, c) && self.is_multiple_of(y, c),
            _ => false,
        }
    }

    /// `id / c`, valid only when `is_multiple_of(id, c)` holds.
    fn exact_quotient(&self, id: ExprId, c: i64) -> ExprId {
        match self.node(id) {
            ExprNode::Const(v) => self.constant(v / c),
            ExprNode::Mul(x, y) => {
                let k = self.as_constant(y).unwrap_or(c);
                self.mul(x, self.constant(k / c))
            }
            ExprNode::Add(x, y) => {
                let (qx, qy) = (self.exact_quotient(x, c), self.exact_quotient(y, c));
                self.add(qx, qy)
            }
            _ => id,
        }
    }

    // ── Composition ─────────────────────────────────────────────────────

    /// Replace `d{i}` by `dims[i]` and `s{i}` by `syms[i]`, rebuilding through
    /// the smart constructors. Variables without a replacement are kept.
    pub fn substitute(&self, id: ExprId, dims: &[ExprId], syms: &[ExprId]) -> ExprId {
        let mut memo = HashMap::new();
        self.substitute_memo(id, dims, syms, &mut memo)
    }

    fn substitute_memo(
        &self,
        id: ExprId,
        dims: &[ExprId],
        syms: &[ExprId],
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> ExprId {
        if let Some(&done) = memo.get(&id) {
            return done;
        }
        let result = match self.node(id) {
            ExprNode::Const(_) => id,
            ExprNode::Dim(i) => dims.get(i as usize).copied().unwrap_or(id),
            ExprNode::Sym(i) => syms.get(i as usize).copied().unwrap_or(id),
            ExprNode::Add(a, b) => {
                let (a, b) = self.substitute_pair(a, b, dims, syms, memo);
                self.add(a, b)
            }
            ExprNode::Mul(a, b) => {
                let (a, b) = self.substitute_pair(a, b, dims, syms, memo);
                self.mul(a, b)
            }
            ExprNode::FloorDiv(a, b) => {
                let (a, b) = self.substitute_pair(a, b, dims, syms, memo);
                self.floor_div(a, b)
            }
            ExprNode::Mod(a, b) => {
                let (a, b) = self.substitute_pair(a, b, dims, syms, memo);
                self.modulo(a, b)
            }
        };
        memo.insert(id, result);
        result
    }

    fn substitute_pair(
        &self,
        a: ExprId,
        b: ExprId,
        dims: &[ExprId],
        syms: &[ExprId],
        memo: &mut HashMap<ExprId, ExprId>,
    ) -> (ExprId, ExprId) {
        let a = self.substitute_memo(a, dims, syms, memo);
        let b = self.substitute_memo(b, dims, syms, memo);
        (a, b)
    }

    /// Bind every symbol to a constant, leaving dims free.
    pub fn bind_symbols(&self, id: ExprId, values: &[i64]) -> ExprId {
        let syms: Vec<ExprId> = values.iter().map(|&v| self.constant(v)).collect();
        self.substitute(id, &[], &syms)
    }

    /// Rebuild an expression through the smart constructors.
    pub fn simplify(&self, id: ExprId) -> ExprId {
        self.substitute(id, &[], &[])
    }

    // ── Evaluation ──────────────────────────────────────────────────────

    pub fn evaluate(&self, id: ExprId, dims: &[i64], syms: &[i64]) -> Result<i64, EvalError> {
        let interner = self.read();
        eval_node(&interner.nodes, id, dims, syms)
    }

    /// Whether any `s{i}` occurs in the expression.
    pub fn has_symbols(&self, id: ExprId) -> bool {
        match self.node(id) {
            ExprNode::Sym(_) => true,
            ExprNode::Const(_) | ExprNode::Dim(_) => false,
            ExprNode::Add(a, b)
            | ExprNode::Mul(a, b)
            | ExprNode::FloorDiv(a, b)
            | ExprNode::Mod(a, b) => self.has_symbols(a) || self.has_symbols(b),
        }
    }

    // ── Rendering ───────────────────────────────────────────────────────

    /// Human-readable form, e.g. `d0 * s0 + 3` or `(d1 mod 4) * 2`.
    pub fn render(&self, id: ExprId) -> String {
        let interner = self.read();
        let mut out = String::new();
        render_node(&interner.nodes, id, &mut out);
        out
    }
}

// ── Integer helpers ─────────────────────────────────────────────────────────

/// Division rounding toward negative infinity; `None` on zero divisor or
/// overflow.
pub fn floor_div_i64(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder matching `floor_div_i64`: the result has the sign of `b`.
pub fn floor_mod_i64(a: i64, b: i64) -> Option<i64> {
    let q = floor_div_i64(a, b)?;
    a.checked_sub(q.checked_mul(b)?)
}

fn eval_node(nodes: &[ExprNode], id: ExprId, dims: &[i64], syms: &[i64]) -> Result<i64, EvalError> {
    let binary = |a: ExprId, b: ExprId| -> Result<(i64, i64), EvalError> {
        Ok((eval_node(nodes, a, dims, syms)?, eval_node(nodes, b, dims, syms)?))
    };
    match nodes[id.index()] {
        ExprNode::Const(v) => Ok(v),
        ExprNode::Dim(i) => dims
            .get(i as usize)
            .copied()
            .ok_or(EvalError::Unbound(Var::Dim(i))),
        ExprNode::Sym(i) => syms
            .get(i as usize)
            .copied()
            .ok_or(EvalError::Unbound(Var::Sym(i))),
        ExprNode::Add(a, b) => {
            let (x, y) = binary(a, b)?;
            x.checked_add(y).ok_or(EvalError::Overflow)
        }
        ExprNode::Mul(a, b) => {
            let (x, y) = binary(a, b)?;
            x.checked_mul(y).ok_or(EvalError::Overflow)
        }
        ExprNode::FloorDiv(a, b) => {
            let (x, y) = binary(a, b)?;
            if y == 0 {
                return Err(EvalError::DivisionByZero);
            }
            floor_div_i64(x, y).ok_or(EvalError::Overflow)
        }
        ExprNode::Mod(a, b) => {
            let (x, y) = binary(a, b)?;
            if y == 0 {
                return Err(EvalError::DivisionByZero);
            }
            floor_mod_i64(x, y).ok_or(EvalError::Overflow)
        }
    }
}

fn is_atom(node: ExprNode) -> bool {
    matches!(node, ExprNode::Const(_) | ExprNode::Dim(_) | ExprNode::Sym(_))
}

fn render_parenthesized(nodes: &[ExprNode], id: ExprId, parens: bool, out: &mut String) {
    if parens {
        out.push('(');
        render_node(nodes, id, out);
        out.push(')');
    } else {
        render_node(nodes, id, out);
    }
}

fn render_node(nodes: &[ExprNode], id: ExprId, out: &mut String) {
    use std::fmt::Write as _;

    match nodes[id.index()] {
        ExprNode::Const(v) => {
            let _ = write!(out, "{}", v);
        }
        ExprNode::Dim(i) => {
            let _ = write!(out, "d{}", i);
        }
        ExprNode::Sym(i) => {
            let _ = write!(out, "s{}", i);
        }
        ExprNode::Add(a, b) => {
            render_node(nodes, a, out);
            match nodes[b.index()] {
                ExprNode::Const(c) if c < 0 => {
                    let _ = write!(out, " - {}", c.unsigned_abs());
                }
                ExprNode::Mul(x, y) if matches!(nodes[y.index()], ExprNode::Const(c) if c < 0) => {
                    out.push_str(" - ");
                    let c = match nodes[y.index()] {
                        ExprNode::Const(c) => c.unsigned_abs(),
                        _ => 1,
                    };
                    if c == 1 {
                        render_parenthesized(nodes, x, matches!(nodes[x.index()], ExprNode::Add(..)), out);
                    } else {
                        render_mul_lhs(nodes, x, out);
                        let _ = write!(out, " * {}", c);
                    }
                }
                other => {
                    out.push_str(" + ");
                    render_parenthesized(nodes, b, matches!(other, ExprNode::Add(..)), out);
                }
            }
        }
        ExprNode::Mul(a, b) => {
            render_mul_lhs(nodes, a, out);
            out.push_str(" * ");
            render_parenthesized(nodes, b, !is_atom(nodes[b.index()]), out);
        }
        ExprNode::FloorDiv(a, b) | ExprNode::Mod(a, b) => {
            let op = if matches!(nodes[id.index()], ExprNode::Mod(..)) {
                " mod "
            } else {
                " floordiv "
            };
            render_parenthesized(nodes, a, !is_atom(nodes[a.index()]), out);
            out.push_str(op);
            render_parenthesized(nodes, b, !is_atom(nodes[b.index()]), out);
        }
    }
}

/// Left operand of `*`: chains of products stay flat, anything else
/// compound is parenthesized.
fn render_mul_lhs(nodes: &[ExprNode], id: ExprId, out: &mut String) {
    let node = nodes[id.index()];
    let parens = !is_atom(node) && !matches!(node, ExprNode::Mul(..));
    render_parenthesized(nodes, id, parens, out);
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn constants_fold() {
        let cx = ExprContext::new();
        let e = cx.add(cx.constant(2), cx.mul(cx.constant(3), cx.constant(4)));
        assert_eq!(cx.as_constant(e), Some(14));
        assert_eq!(cx.as_constant(cx.floor_div(cx.constant(-7), cx.constant(2))), Some(-4));
        assert_eq!(cx.as_constant(cx.modulo(cx.constant(-7), cx.constant(2))), Some(1));
    }

    #[test]
    fn constant_term_of_shifted_sum() {
        let cx = ExprContext::new();
        let shifted = cx.add(cx.mul(cx.dim(0), cx.symbol(0)), cx.constant(3));
        assert_eq!(cx.constant_term(shifted), 3);
        assert_eq!(cx.constant_term(cx.mul(shifted, cx.constant(16))), 48);
        assert_eq!(cx.constant_term(cx.constant(5)), 5);
        assert_eq!(cx.constant_term(cx.mul(cx.dim(0), cx.symbol(0))), 0);
    }

    #[test]
    fn interning_is_structural() {
        let cx = ExprContext::new();
        let a = cx.add(cx.dim(0), cx.symbol(0));
        let b = cx.add(cx.symbol(0), cx.dim(0));
        assert_eq!(a, b);
        assert_eq!(cx.render(a), "d0 + s0");
        assert_eq!(cx.mul(cx.symbol(1), cx.dim(1)), cx.mul(cx.dim(1), cx.symbol(1)));
    }

    #[test]
    fn neutral_and_absorbing_elements() {
        let cx = ExprContext::new();
        let d0 = cx.dim(0);
        assert_eq!(cx.add(d0, cx.constant(0)), d0);
        assert_eq!(cx.mul(cx.constant(1), d0), d0);
        assert_eq!(cx.as_constant(cx.mul(d0, cx.constant(0))), Some(0));
        assert_eq!(cx.floor_div(d0, cx.constant(1)), d0);
        assert_eq!(cx.as_constant(cx.modulo(d0, cx.constant(1))), Some(0));
    }

    #[test]
    fn constants_move_right_and_fold_through_chains() {
        let cx = ExprContext::new();
        let e = cx.add(cx.constant(3), cx.dim(0));
        assert_eq!(cx.render(e), "d0 + 3");
        let e = cx.add(e, cx.constant(4));
        assert_eq!(cx.render(e), "d0 + 7");
        let m = cx.mul(cx.mul(cx.dim(0), cx.constant(2)), cx.constant(8));
        assert_eq!(cx.render(m), "d0 * 16");
        let offset = cx.add(cx.mul(cx.dim(0), cx.symbol(0)), cx.constant(3));
        assert_eq!(cx.render(offset), "d0 * s0 + 3");
    }

    #[test]
    fn subtraction_renders_with_minus() {
        let cx = ExprContext::new();
        assert_eq!(cx.render(cx.sub(cx.dim(0), cx.constant(2))), "d0 - 2");
        assert_eq!(cx.render(cx.sub(cx.symbol(0), cx.dim(0))), "s0 - d0");
        let twice = cx.mul(cx.dim(1), cx.constant(2));
        assert_eq!(cx.render(cx.sub(cx.symbol(0), twice)), "s0 - d1 * 2");
    }

    #[test]
    fn product_division_rules() {
        let cx = ExprContext::new();
        let d0 = cx.dim(0);
        let x4 = cx.mul(d0, cx.constant(4));
        let x2 = cx.mul(d0, cx.constant(2));
        assert_eq!(cx.render(cx.floor_div(x4, cx.constant(2))), "d0 * 2");
        assert_eq!(cx.render(cx.floor_div(x2, cx.constant(4))), "d0 floordiv 2");
        assert_eq!(cx.as_constant(cx.modulo(x4, cx.constant(2))), Some(0));
        assert_eq!(cx.render(cx.modulo(x2, cx.constant(8))), "(d0 mod 4) * 2");
    }

    #[test]
    fn nested_floordiv_collapses() {
        let cx = ExprContext::new();
        let e = cx.floor_div(cx.floor_div(cx.symbol(0), cx.constant(4)), cx.constant(8));
        assert_eq!(cx.render(e), "s0 floordiv 32");
    }

    #[test]
    fn sums_split_around_multiples() {
        let cx = ExprContext::new();
        let big = cx.mul(cx.dim(0), cx.constant(8));
        let sum = cx.add(big, cx.dim(1));
        assert_eq!(cx.render(sum), "d1 + d0 * 8");
        assert_eq!(cx.render(cx.floor_div(sum, cx.constant(8))), "d0 + d1 floordiv 8");
        assert_eq!(cx.render(cx.modulo(sum, cx.constant(8))), "d1 mod 8");
    }

    #[test]
    fn evaluate_binds_variables() {
        let cx = ExprContext::new();
        let e = cx.add(cx.mul(cx.dim(0), cx.symbol(0)), cx.constant(3));
        assert_eq!(cx.evaluate(e, &[2], &[4]), Ok(11));
        assert_eq!(
            cx.evaluate(cx.symbol(1), &[], &[4]),
            Err(EvalError::Unbound(Var::Sym(1)))
        );
        let div = cx.floor_div(cx.dim(0), cx.symbol(0));
        assert_eq!(cx.evaluate(div, &[5], &[0]), Err(EvalError::DivisionByZero));
        assert_eq!(cx.evaluate(div, &[-5], &[2]), Ok(-3));
        let big = cx.mul(cx.symbol(0), cx.symbol(0));
        assert_eq!(cx.evaluate(big, &[], &[i64::MAX]), Err(EvalError::Overflow));
    }

    #[test]
    fn substitute_composes() {
        let cx = ExprContext::new();
        let offset = cx.add(cx.mul(cx.dim(0), cx.symbol(0)), cx.dim(1));
        assert_eq!(cx.render(offset), "d1 + d0 * s0");
        let bound = cx.bind_symbols(offset, &[8]);
        assert_eq!(cx.render(bound), "d1 + d0 * 8");
        assert!(!cx.has_symbols(bound));

        let shifted = cx.substitute(offset, &[cx.constant(2)], &[]);
        assert_eq!(cx.render(shifted), "d1 + s0 * 2");
    }

    #[test]
    fn simplify_is_idempotent_on_canonical_forms() {
        let cx = ExprContext::new();
        let e = cx.modulo(cx.add(cx.symbol(0), cx.constant(7)), cx.constant(8));
        assert_eq!(cx.simplify(e), e);
        assert_eq!(cx.render(e), "(s0 + 7) mod 8");
    }

    #[test]
    fn shared_context_across_threads() {
        let cx = Arc::new(ExprContext::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cx = Arc::clone(&cx);
                std::thread::spawn(move || cx.mul(cx.dim(0), cx.symbol(0)))
            })
            .collect();
        let ids: Vec<ExprId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cx.render(ids[0]), "d0 * s0");
    }
}
