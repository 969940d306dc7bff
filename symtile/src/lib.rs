// symtile — symbolic tiling analysis for fused tensor computations
//
// Library root. Front-end (lexer, parser, graph), symbolic core (expr,
// constraint, symbolic_tile, tiled_node, analysis), concrete queries
// (tiled_computation, search, config) and outputs (report, dot).

pub mod analysis;
pub mod ast;
pub mod config;
pub mod constraint;
pub mod diag;
pub mod dot;
pub mod expr;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod report;
pub mod search;
pub mod symbolic_tile;
pub mod tiled_computation;
pub mod tiled_node;
