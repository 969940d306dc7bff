// dot.rs — Graphviz DOT output for the tiled graph
//
// Renders a `SymbolicTileAnalysis` as a DOT digraph for `--emit dot`. Every
// tiled node is a box labelled with its instruction and tile sizes; tiled
// nodes of the same instruction are grouped in one cluster so that an
// instruction read through several tiles is visible at a glance. Edges run
// from operand to user.
//
// Preconditions: none.
// Postconditions: output is a complete `digraph symtile { ... }` document,
//                 deterministic for a given analysis.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::analysis::SymbolicTileAnalysis;
use crate::graph::{InstrId, OpKind};
use crate::symbolic_tile::render_exprs;

/// Generate a DOT digraph of the analysis.
pub fn emit_dot(analysis: &SymbolicTileAnalysis) -> String {
    let mut buf = String::new();
    let _ = write_dot(&mut buf, analysis);
    buf
}

fn write_dot(buf: &mut String, analysis: &SymbolicTileAnalysis) -> fmt::Result {
    let cx = analysis.context();
    writeln!(buf, "digraph symtile {{")?;
    writeln!(buf, "    rankdir=BT;")?;
    writeln!(
        buf,
        "    label=\"{}\";",
        escape(&analysis.computation().name)
    )?;
    writeln!(buf, "    node [fontname=\"monospace\"];")?;

    let mut by_instr: BTreeMap<InstrId, Vec<usize>> = BTreeMap::new();
    for (i, node) in analysis.nodes().iter().enumerate() {
        by_instr.entry(node.instr).or_default().push(i);
    }

    let root = analysis.nodes().len() - 1;
    for (&id, members) in &by_instr {
        let instr = analysis.computation().instr(id);
        let grouped = members.len() > 1;
        let indent = if grouped { "        " } else { "    " };
        if grouped {
            writeln!(buf)?;
            writeln!(buf, "    subgraph cluster_{} {{", sanitize(&instr.name))?;
            writeln!(buf, "        label=\"{}\";", escape(&instr.name))?;
            writeln!(buf, "        style=dashed;")?;
        }
        for &i in members {
            let node = &analysis.nodes()[i];
            let sizes = render_exprs(cx, &node.tile.sizes());
            let (shape, color) = node_style(&instr.kind);
            let mut attrs = format!(
                "shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{}\\n{}\"",
                escape(&instr.name),
                instr.kind.name(),
                escape(&sizes)
            );
            if i == root {
                attrs.push_str(", penwidth=2");
            }
            if !node.tile.constraints.is_always_satisfied() {
                let where_ = node.tile.constraints.render(cx);
                let _ = write!(attrs, ", tooltip=\"{}\"", escape(&where_));
            }
            writeln!(buf, "{indent}n{i} [{attrs}];")?;
        }
        if grouped {
            writeln!(buf, "    }}")?;
        }
    }

    writeln!(buf)?;
    for (i, node) in analysis.nodes().iter().enumerate() {
        for (k, &operand) in node.operands.iter().enumerate() {
            if node.operands.len() > 1 {
                writeln!(buf, "    n{operand} -> n{i} [label=\"{k}\"];")?;
            } else {
                writeln!(buf, "    n{operand} -> n{i};")?;
            }
        }
    }

    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Map an instruction name to DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn node_style(kind: &OpKind) -> (&'static str, &'static str) {
    match kind {
        OpKind::Parameter | OpKind::Constant | OpKind::Iota => ("cylinder", "lightsalmon"),
        OpKind::Reduce { .. } | OpKind::Dot { .. } => ("box", "lightyellow"),
        OpKind::Broadcast { .. }
        | OpKind::Transpose { .. }
        | OpKind::Slice { .. }
        | OpKind::Reshape => ("box", "lightgreen"),
        OpKind::Elementwise(_) | OpKind::Opaque(_) => ("box", "lightblue"),
    }
}
