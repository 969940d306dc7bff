// constraint.rs — Disjunctive constraint expressions over tile parameters
//
// A `ConstraintExpression` is a disjunction of conjunctions of interval
// constraints `expr in [lo, hi]`. Two special states exist: "always
// satisfied" (no conjunctions, satisfiable) and "unsatisfiable".
//
// Preconditions: every expression belongs to the `ExprContext` passed in.
// Postconditions: `and` only ever shrinks the feasible region; `or` only ever
//                 grows it; conjunctions are deduplicated.
// Failure modes: evaluation fails on an unbound variable; a division by zero
//                makes that single constraint false.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::expr::{EvalError, ExprContext, ExprId, Var};

// ── Interval ────────────────────────────────────────────────────────────────

/// Closed integer interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

impl Interval {
    pub fn new(lo: i64, hi: i64) -> Self {
        Interval { lo, hi }
    }

    pub fn point(value: i64) -> Self {
        Interval::new(value, value)
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn contains(&self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

// ── Constraint expression ───────────────────────────────────────────────────

/// Constraints that must all hold together.
pub type ConjointConstraints = BTreeMap<ExprId, Interval>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintExpression {
    is_satisfiable: bool,
    disjuncts: Vec<ConjointConstraints>,
}

impl Default for ConstraintExpression {
    fn default() -> Self {
        Self::always_satisfied()
    }
}

impl ConstraintExpression {
    pub fn always_satisfied() -> Self {
        ConstraintExpression {
            is_satisfiable: true,
            disjuncts: Vec::new(),
        }
    }

    pub fn unsatisfiable() -> Self {
        ConstraintExpression {
            is_satisfiable: false,
            disjuncts: Vec::new(),
        }
    }

    /// A single `expr in interval` constraint. Constant expressions are
    /// decided immediately.
    pub fn from_constraint(cx: &ExprContext, expr: ExprId, interval: Interval) -> Self {
        if interval.is_empty() {
            return Self::unsatisfiable();
        }
        if let Some(value) = cx.as_constant(expr) {
            return if interval.contains(value) {
                Self::always_satisfied()
            } else {
                Self::unsatisfiable()
            };
        }
        ConstraintExpression {
            is_satisfiable: true,
            disjuncts: vec![BTreeMap::from([(expr, interval)])],
        }
    }

    /// `expr mod divisor == 0`.
    pub fn divisible(cx: &ExprContext, expr: ExprId, divisor: ExprId) -> Self {
        Self::from_constraint(cx, cx.modulo(expr, divisor), Interval::point(0))
    }

    pub fn is_satisfiable(&self) -> bool {
        self.is_satisfiable
    }

    pub fn is_always_satisfied(&self) -> bool {
        self.is_satisfiable && self.disjuncts.is_empty()
    }

    pub fn disjuncts(&self) -> &[ConjointConstraints] {
        &self.disjuncts
    }

    /// Conjunction: every pair of conjunctions is merged, intersecting the
    /// intervals of shared expressions.
    pub fn and(&self, other: &ConstraintExpression) -> ConstraintExpression {
        if !self.is_satisfiable || !other.is_satisfiable {
            return Self::unsatisfiable();
        }
        if self.disjuncts.is_empty() {
            return other.clone();
        }
        if other.disjuncts.is_empty() {
            return self.clone();
        }

        let mut disjuncts: Vec<ConjointConstraints> = Vec::new();
        for lhs in &self.disjuncts {
            'rhs: for rhs in &other.disjuncts {
                let mut merged = lhs.clone();
                for (&expr, interval) in rhs {
                    let combined = match merged.get(&expr) {
                        Some(existing) => existing.intersect(interval),
                        None => *interval,
                    };
                    if combined.is_empty() {
                        continue 'rhs;
                    }
                    merged.insert(expr, combined);
                }
                push_unique(&mut disjuncts, merged);
            }
        }

        if disjuncts.is_empty() {
            Self::unsatisfiable()
        } else {
            ConstraintExpression {
                is_satisfiable: true,
                disjuncts,
            }
        }
    }

    /// Disjunction of both constraint sets.
    pub fn or(&self, other: &ConstraintExpression) -> ConstraintExpression {
        if self.is_always_satisfied() || other.is_always_satisfied() {
            return Self::always_satisfied();
        }
        if !self.is_satisfiable {
            return other.clone();
        }
        if !other.is_satisfiable {
            return self.clone();
        }
        let mut disjuncts = self.disjuncts.clone();
        for conj in &other.disjuncts {
            push_unique(&mut disjuncts, conj.clone());
        }
        ConstraintExpression {
            is_satisfiable: true,
            disjuncts,
        }
    }

    /// Evaluate against concrete tile sizes bound to `s0..sn`.
    ///
    /// Conjunctions are tried in order and the first one that holds decides.
    /// Every constraint of a tried conjunction is evaluated, so a missing
    /// parameter is reported even when an earlier constraint already failed.
    pub fn is_satisfied_by(&self, cx: &ExprContext, syms: &[i64]) -> Result<bool, Var> {
        if !self.is_satisfiable {
            return Ok(false);
        }
        if self.disjuncts.is_empty() {
            return Ok(true);
        }
        for conj in &self.disjuncts {
            let mut holds = true;
            for (&expr, interval) in conj {
                holds &= constraint_holds(cx, expr, interval, syms)?;
            }
            if holds {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rendered constraints that fail for `syms`, sorted and deduplicated.
    pub fn violations(&self, cx: &ExprContext, syms: &[i64]) -> Vec<String> {
        if !self.is_satisfiable {
            return vec!["unsatisfiable".to_string()];
        }
        let mut out: Vec<String> = self
            .disjuncts
            .iter()
            .flat_map(|conj| conj.iter())
            .filter(|&(&expr, interval)| !matches!(constraint_holds(cx, expr, interval, syms), Ok(true)))
            .map(|(&expr, interval)| render_constraint(cx, expr, interval))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn render(&self, cx: &ExprContext) -> String {
        if !self.is_satisfiable {
            return "unsatisfiable".to_string();
        }
        if self.disjuncts.is_empty() {
            return "always satisfied".to_string();
        }
        self.disjuncts
            .iter()
            .map(|conj| {
                let mut parts: Vec<String> = conj
                    .iter()
                    .map(|(&expr, interval)| render_constraint(cx, expr, interval))
                    .collect();
                parts.sort();
                parts.join(" && ")
            })
            .collect::<Vec<_>>()
            .join(" || ")
    }

    /// A `Display` adapter bound to the context that owns the expressions.
    pub fn display<'a>(&'a self, cx: &'a ExprContext) -> ConstraintDisplay<'a> {
        ConstraintDisplay { constraints: self, cx }
    }
}

pub struct ConstraintDisplay<'a> {
    constraints: &'a ConstraintExpression,
    cx: &'a ExprContext,
}

impl fmt::Display for ConstraintDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.constraints.render(self.cx))
    }
}

fn push_unique(disjuncts: &mut Vec<ConjointConstraints>, conj: ConjointConstraints) {
    if !disjuncts.contains(&conj) {
        disjuncts.push(conj);
    }
}

fn constraint_holds(
    cx: &ExprContext,
    expr: ExprId,
    interval: &Interval,
    syms: &[i64],
) -> Result<bool, Var> {
    match cx.evaluate(expr, &[], syms) {
        Ok(value) => Ok(interval.contains(value)),
        Err(EvalError::Unbound(var)) => Err(var),
        Err(EvalError::DivisionByZero) | Err(EvalError::Overflow) => Ok(false),
    }
}

fn render_constraint(cx: &ExprContext, expr: ExprId, interval: &Interval) -> String {
    format!("{} in {}", cx.render(expr), interval)
}

// ── Tests ───────────────────────────────────────────────────────────────────
