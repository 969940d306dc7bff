// report.rs — Machine-readable analysis report
//
// Serializable view of a `SymbolicTileAnalysis` for `--emit json`: every
// tiled node with its rendered tile, the global constraint, the analysis
// fingerprint and, optionally, the tilings found by the search and one
// materialized tiled computation.
//
// Preconditions: `tilings` and `tiled` (if given) come from `analysis`.
// Postconditions: the report is a pure function of its inputs; rendering it
//                 twice yields identical JSON.
// Failure modes: none (serializing plain strings and integers cannot fail).
// Side effects: none.

use serde::Serialize;

use crate::analysis::SymbolicTileAnalysis;
use crate::search::Tiling;
use crate::symbolic_tile::render_exprs;
use crate::tiled_computation::TiledComputation;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub fusion: String,
    pub fingerprint: String,
    pub tile_parameters: usize,
    pub root_shape: Vec<i64>,
    pub nodes: Vec<NodeReport>,
    pub constraints: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilings: Option<Vec<Vec<i64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiled: Option<TiledReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub index: usize,
    pub instruction: String,
    pub op: &'static str,
    pub shape: Vec<i64>,
    pub offsets: String,
    pub sizes: String,
    pub strides: String,
    pub operands: Vec<usize>,
    /// Omitted when the node adds no constraint of its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TiledReport {
    pub tile_sizes: Vec<i64>,
    pub num_tiles: Vec<i64>,
    pub nodes: Vec<TiledNodeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TiledNodeReport {
    pub instruction: String,
    pub op: &'static str,
    pub tile_sizes: Vec<i64>,
    pub tile_strides: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_offsets: Option<String>,
    pub operands: Vec<usize>,
}

impl AnalysisReport {
    pub fn new(analysis: &SymbolicTileAnalysis) -> Self {
        let cx = analysis.context();
        let nodes = analysis
            .nodes()
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let instr = analysis.instr(node);
                NodeReport {
                    index,
                    instruction: instr.name.clone(),
                    op: instr.kind.name(),
                    shape: instr.shape.clone(),
                    offsets: render_exprs(cx, &node.tile.offsets()),
                    sizes: render_exprs(cx, &node.tile.sizes()),
                    strides: render_exprs(cx, &node.tile.strides()),
                    operands: node.operands.clone(),
                    constraints: (!node.tile.constraints.is_always_satisfied())
                        .then(|| node.tile.constraints.render(cx)),
                }
            })
            .collect();

        AnalysisReport {
            fusion: analysis.computation().name.clone(),
            fingerprint: analysis.fingerprint(),
            tile_parameters: analysis.num_tile_parameters(),
            root_shape: analysis.root_shape().to_vec(),
            nodes,
            constraints: analysis.constraints().render(cx),
            tilings: None,
            tiled: None,
        }
    }

    pub fn with_tilings(mut self, tilings: &[Tiling]) -> Self {
        self.tilings = Some(tilings.iter().map(|t| t.to_vec()).collect());
        self
    }

    pub fn with_tiled(mut self, analysis: &SymbolicTileAnalysis, tiled: &TiledComputation) -> Self {
        let cx = analysis.context();
        let nodes = tiled
            .nodes()
            .iter()
            .map(|node| TiledNodeReport {
                instruction: node.name.clone(),
                op: node.op,
                tile_sizes: node.tile_sizes.clone(),
                tile_strides: node.tile_strides.clone(),
                tile_offsets: node.tile_offsets.as_ref().map(|o| render_exprs(cx, o)),
                operands: node.operands.clone(),
            })
            .collect();
        self.tiled = Some(TiledReport {
            tile_sizes: tiled.tile_sizes().to_vec(),
            num_tiles: tiled.num_tiles().to_vec(),
            nodes,
        });
        self
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json(&self) -> String {
        let mut text = serde_json::to_string_pretty(self).unwrap_or_default();
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprContext;
    use crate::graph::computation_from_text;
    use std::sync::Arc;

    fn analysis(source: &str) -> SymbolicTileAnalysis {
        let comp = computation_from_text(source).computation.unwrap();
        SymbolicTileAnalysis::analyze_computation(&comp, Arc::new(ExprContext::new())).unwrap()
    }

    const REDUCE: &str = "fusion rowsum {
        p = parameter : [10, 8]
        ROOT r = reduce(p) {dims = [1]} : [10]
    }";

    #[test]
    fn report_fields() {
        let a = analysis(REDUCE);
        let json: serde_json::Value = serde_json::from_str(&AnalysisReport::new(&a).to_json()).unwrap();
        assert_eq!(json["fusion"], "rowsum");
        assert_eq!(json["tile_parameters"], 1);
        assert_eq!(json["root_shape"], serde_json::json!([10]));
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(json["nodes"][0]["instruction"], "p");
        assert_eq!(json["nodes"][0]["sizes"], "(s0, 8)");
        assert_eq!(json["nodes"][1]["operands"], serde_json::json!([0]));
        assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);
        assert!(json.get("tilings").is_none());
        assert!(json.get("tiled").is_none());
    }

    #[test]
    fn optional_sections() {
        let a = analysis(REDUCE);
        let tilings = a.good_triton_tilings(&Default::default()).unwrap();
        let tiled = a.compute_tiled_instructions(&[2], true).unwrap();
        let report = AnalysisReport::new(&a)
            .with_tilings(&tilings)
            .with_tiled(&a, &tiled);
        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["tilings"], serde_json::json!([[1], [2], [10]]));
        assert_eq!(json["tiled"]["num_tiles"], serde_json::json!([5]));
        assert_eq!(json["tiled"]["nodes"][0]["tile_sizes"], serde_json::json!([2, 8]));
        assert_eq!(json["tiled"]["nodes"][1]["tile_offsets"], "(d0 * 2)");
    }

    #[test]
    fn json_is_deterministic() {
        let a = AnalysisReport::new(&analysis(REDUCE)).to_json();
        let b = AnalysisReport::new(&analysis(REDUCE)).to_json();
        assert_eq!(a, b);
    }
}
