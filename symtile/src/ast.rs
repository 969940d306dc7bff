// AST node types for fusion text files (.ft).
//
// Mirrors the grammar accepted by `parser.rs`. Every node carries a
// `SimpleSpan` for error reporting in graph construction.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// A name with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// `fusion NAME { instr* }`
#[derive(Debug, Clone, PartialEq)]
pub struct FusionDecl {
    pub name: Ident,
    pub instructions: Vec<InstrDecl>,
    pub span: Span,
}

/// `[ROOT] NAME = OP [(operands)] [{attrs}] : [dims]`
#[derive(Debug, Clone, PartialEq)]
pub struct InstrDecl {
    pub is_root: bool,
    pub name: Ident,
    pub op: Ident,
    pub operands: Vec<Ident>,
    pub attrs: Vec<Attr>,
    pub shape: ShapeDecl,
    pub span: Span,
}

/// `name = [i, j, ...]`; every attribute is an integer list.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: Ident,
    pub values: Vec<i64>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDecl {
    pub dims: Vec<i64>,
    pub span: Span,
}

impl InstrDecl {
    /// Look up an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name.name == name)
    }
}
