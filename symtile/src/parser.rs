// Parser for fusion text files (.ft).
//
// Parses a token stream (from the lexer) into a `FusionDecl`. Uses chumsky
// combinators. Grammar:
//
//   fusion  := 'fusion' IDENT '{' instr* '}'
//   instr   := 'ROOT'? IDENT '=' IDENT operands? attrs? ':' shape
//   operands:= '(' (IDENT (',' IDENT)*)? ')'
//   attrs   := '{' (IDENT '=' ints (',' IDENT '=' ints)*)? '}'
//   shape   := ints
//   ints    := '[' (INT (',' INT)*)? ']'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{codes, Diagnostic};
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub fusion: Option<FusionDecl>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

impl ParseResult {
    /// Convert lex/parse errors into `E0100` diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors
            .iter()
            .map(|err| Diagnostic::error(codes::E0100, err.to_string()).with_span(*err.span()))
            .collect()
    }
}

/// Parse a fusion source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = fusion_parser(source);
    let (fusion, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        fusion,
        errors: all_errors,
    }
}

// ── Parser builder ──
//
// All rules are built inside `fusion_parser` so that the `source` reference
// is captured once and shared by the identifier combinator.

fn fusion_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, FusionDecl, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let int = select! {
        Token::Int(n) => n,
    };

    let int_list = int
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    let shape = int_list
        .clone()
        .map_with(|dims, e| ShapeDecl {
            dims,
            span: e.span(),
        });

    let operands = ident
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let attr = ident
        .clone()
        .then_ignore(just(Token::Equals))
        .then(int_list)
        .map_with(|(name, values), e| Attr {
            name,
            values,
            span: e.span(),
        });

    let attrs = attr
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let instr = just(Token::Root)
        .or_not()
        .then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then(operands.or_not())
        .then(attrs.or_not())
        .then_ignore(just(Token::Colon))
        .then(shape)
        .map_with(
            |(((((root, name), op), operands), attrs), shape), e| InstrDecl {
                is_root: root.is_some(),
                name,
                op,
                operands: operands.unwrap_or_default(),
                attrs: attrs.unwrap_or_default(),
                shape,
                span: e.span(),
            },
        );

    just(Token::Fusion)
        .ignore_then(ident)
        .then(
            instr
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(name, instructions), e| FusionDecl {
            name,
            instructions,
            span: e.span(),
        })
}

// ── Tests ──
