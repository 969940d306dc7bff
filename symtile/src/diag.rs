// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic type used by the fusion front-end, the
// symbolic tile analysis, constraint evaluation and materialization.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0300`, `W0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by phase.
pub mod codes {
    use super::DiagCode;

    // ── Front-end (E01xx) ──
    pub const E0100: DiagCode = DiagCode("E0100"); // lex / parse error

    // ── Graph construction (E02xx / W02xx) ──
    pub const E0200: DiagCode = DiagCode("E0200"); // undefined operand
    pub const E0201: DiagCode = DiagCode("E0201"); // duplicate instruction name
    pub const E0202: DiagCode = DiagCode("E0202"); // missing or multiple ROOT
    pub const E0203: DiagCode = DiagCode("E0203"); // unknown operation
    pub const E0204: DiagCode = DiagCode("E0204"); // invalid shape or attribute
    pub const E0205: DiagCode = DiagCode("E0205"); // wrong operand count
    pub const W0200: DiagCode = DiagCode("W0200"); // unreachable from ROOT

    // ── Symbolic tile analysis (E03xx) ──
    pub const E0300: DiagCode = DiagCode("E0300"); // no tiling rule for operation
    pub const E0301: DiagCode = DiagCode("E0301"); // overlapping windows
    pub const E0302: DiagCode = DiagCode("E0302"); // strided input to a flattening reshape
    pub const E0303: DiagCode = DiagCode("E0303"); // zero-sized dimension
    pub const E0304: DiagCode = DiagCode("E0304"); // constraints unsatisfiable

    // ── Evaluation / materialization (E04xx) ──
    pub const E0400: DiagCode = DiagCode("E0400"); // constraint not reducible to a constant
    pub const E0401: DiagCode = DiagCode("E0401"); // tile parameter count mismatch
    pub const E0402: DiagCode = DiagCode("E0402"); // parameters violate constraints
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
///
/// Analysis diagnostics have no source span: they name the offending
/// instruction in the message instead.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic with a code.
    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the source location the diagnostic refers to.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        use chumsky::span::Span as _;
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, "instruction 'x' is unused")
            .with_code(codes::W0200);
        assert_eq!(format!("{d}"), "warning[W0200]: instruction 'x' is unused");
    }

    #[test]
    fn display_lists_causes_before_hint() {
        let d = Diagnostic::error(codes::E0402, "tile parameters violate constraints")
            .with_cause("10 mod s0 in [0, 0]", None)
            .with_hint("choose sizes that divide the dimension");
        assert_eq!(
            format!("{d}"),
            "error[E0402]: tile parameters violate constraints\n  \
             cause: 10 mod s0 in [0, 0]\n  \
             hint: choose sizes that divide the dimension"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0204, "shape mismatch")
            .with_span(dummy_span())
            .with_hint("operands of elementwise ops share the output shape")
            .with_cause("operand 'p1' has shape [4]", Some(dummy_span()));

        assert_eq!(d.code, Some(codes::E0204));
        assert!(d.is_error());
        assert!(d.span.is_some());
        assert_eq!(
            d.hint.as_deref(),
            Some("operands of elementwise ops share the output shape")
        );
        assert_eq!(d.cause_chain.len(), 1);
    }
}
