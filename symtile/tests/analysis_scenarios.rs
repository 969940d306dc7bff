// End-to-end analysis scenarios over the library API.
//
// Each test builds a fusion from text, runs the symbolic tile analysis and
// checks constraint evaluation, materialization or the tiling search.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use symtile::analysis::SymbolicTileAnalysis;
use symtile::config::{TilingConfig, TritonConstraints};
use symtile::diag::{codes, Diagnostic};
use symtile::expr::ExprContext;
use symtile::search::{good_tilings, CandidatePolicy};

// ── Test helpers ────────────────────────────────────────────────────────────

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn analyze(source: &str) -> Result<SymbolicTileAnalysis, Diagnostic> {
    let graph = symtile::graph::computation_from_text(source);
    let comp = graph
        .computation
        .unwrap_or_else(|| panic!("graph errors: {:?}", graph.diagnostics));
    SymbolicTileAnalysis::analyze_computation(&comp, Arc::new(ExprContext::new()))
}

fn analyze_ok(source: &str) -> SymbolicTileAnalysis {
    analyze(source).unwrap_or_else(|d| panic!("analysis failed: {}", d))
}

fn demo(name: &str) -> String {
    let path = project_root().join("demos").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {}", path.display(), e))
}

const ELEMENTWISE: &str = "fusion ew {
    a = parameter : [128, 64]
    b = parameter : [128, 64]
    m = multiply(a, b) : [128, 64]
    ROOT t = tanh(m) : [128, 64]
}";

// ── Constraint evaluation ───────────────────────────────────────────────────

#[test]
fn elementwise_root_power_of_two_divisors() {
    let analysis = analyze_ok(ELEMENTWISE);
    let dims = analysis.root_shape().to_vec();
    let tilings = good_tilings(&dims, &CandidatePolicy::PowersOfTwo, |t| {
        analysis.parameters_satisfy_constraints(t).unwrap()
            && dims.iter().zip(t).all(|(&d, &s)| d % s == 0)
    });
    // 8 sizes along 128 and 7 along 64.
    assert_eq!(tilings.len(), 56);
    assert_eq!(tilings.first().map(|t| t.to_vec()), Some(vec![1, 1]));
    assert_eq!(tilings.last().map(|t| t.to_vec()), Some(vec![128, 64]));
}

#[test]
fn elementwise_root_accepts_any_in_range_size() {
    let analysis = analyze_ok(ELEMENTWISE);
    assert!(analysis.parameters_satisfy_constraints(&[3, 7]).unwrap());
    assert!(!analysis.parameters_satisfy_constraints(&[0, 7]).unwrap());
    assert!(!analysis.parameters_satisfy_constraints(&[129, 7]).unwrap());
}

#[test]
fn reduce_rejects_non_dividing_tile() {
    let analysis = analyze_ok(
        "fusion rowsum {
            p = parameter : [10, 8]
            ROOT r = reduce(p) {dims = [1]} : [10]
        }",
    );
    assert_eq!(analysis.parameters_satisfy_constraints(&[3]).unwrap(), false);
    let err = analysis.compute_tiled_instructions(&[3], false).unwrap_err();
    assert_eq!(err.code, Some(codes::E0402));
    assert_eq!(err.cause_chain.len(), 1);
    assert_eq!(err.cause_chain[0].message, "10 mod s0 in [0, 0]");
}

#[test]
fn reshape_tile_must_cover_rows_or_divide_them() {
    let analysis = analyze_ok(&demo("reshape.ft"));
    for (size, ok) in [(1, true), (8, true), (16, true), (24, false), (32, true), (40, false), (128, true)] {
        assert_eq!(
            analysis.parameters_satisfy_constraints(&[size]).unwrap(),
            ok,
            "tile size {}",
            size
        );
    }
}

#[test]
fn reshape_tile_maps_back_to_rows() {
    let analysis = analyze_ok(&demo("reshape.ft"));
    let tiled = analysis.compute_tiled_instructions(&[32], true).unwrap();
    let p = &tiled.nodes()[0];
    assert_eq!(p.name, "p");
    assert_eq!(p.tile_sizes, vec![2, 16]);
    assert_eq!(tiled.offsets_at(p, &[3]), Some(Ok(vec![6, 0])));
    assert_eq!(tiled.num_tiles(), &[4]);
}

#[test]
fn shifted_slice_over_flatten_keeps_tiles_in_bounds() {
    let analysis = analyze_ok(
        "fusion f {
            p = parameter : [8, 16]
            r = reshape(p) : [128]
            ROOT s = slice(r) {start = [3], limit = [67], stride = [1]} : [64]
        }",
    );
    assert!(!analysis.parameters_satisfy_constraints(&[16]).unwrap());
    let err = analysis.compute_tiled_instructions(&[16], false).unwrap_err();
    assert_eq!(err.code, Some(codes::E0402));
    assert!(err.cause_chain.iter().any(|c| c.message == "3 mod s0 in [0, 0]"));

    assert!(analysis.parameters_satisfy_constraints(&[1]).unwrap());
    let tiled = analysis.compute_tiled_instructions(&[1], true).unwrap();
    let p = &tiled.nodes()[0];
    assert_eq!(p.name, "p");
    assert_eq!(p.tile_sizes, vec![1, 1]);
    assert_eq!(tiled.offsets_at(p, &[0]), Some(Ok(vec![0, 3])));
    assert_eq!(tiled.offsets_at(p, &[13]), Some(Ok(vec![1, 0])));
}

#[test]
fn transpose_swaps_tile_dimensions() {
    let analysis = analyze_ok(&demo("transpose.ft"));
    let tiled = analysis.compute_tiled_instructions(&[4, 8], true).unwrap();
    let a = tiled.nodes().iter().find(|n| n.name == "a").unwrap();
    assert_eq!(a.tile_sizes, vec![8, 4]);
    assert_eq!(tiled.offsets_at(a, &[1, 2]), Some(Ok(vec![16, 4])));
}

#[test]
fn strided_slice_scales_offsets_and_strides() {
    let analysis = analyze_ok(&demo("strided_slice.ft"));
    let tiled = analysis.compute_tiled_instructions(&[4], true).unwrap();
    let p = &tiled.nodes()[0];
    assert_eq!(p.tile_strides, vec![2]);
    assert_eq!(tiled.offsets_at(p, &[0]), Some(Ok(vec![4])));
    assert_eq!(tiled.offsets_at(p, &[3]), Some(Ok(vec![28])));
}

// ── Materialization ─────────────────────────────────────────────────────────

#[test]
fn identity_tiling_spans_every_output() {
    for name in ["softmax.ft", "reshape.ft", "transpose.ft", "matmul.ft"] {
        let analysis = analyze_ok(&demo(name));
        let shape = analysis.root_shape().to_vec();
        let tiled = analysis
            .compute_tiled_instructions(&shape, false)
            .unwrap_or_else(|d| panic!("{}: {}", name, d));
        assert_eq!(tiled.total_tiles(), 1, "{}", name);
        for node in tiled.nodes() {
            let extent = &analysis.computation().instr(node.instr).shape;
            assert_eq!(&node.tile_sizes, extent, "{}: node {}", name, node.name);
        }
    }
}

#[test]
fn materialized_nodes_are_def_before_use() {
    let analysis = analyze_ok(&demo("softmax.ft"));
    let tiled = analysis.compute_tiled_instructions(&[32, 16], false).unwrap();
    for (i, node) in tiled.nodes().iter().enumerate() {
        assert!(node.operands.iter().all(|&o| o < i), "node {}", node.name);
    }
    assert_eq!(tiled.root().name, "e");
}

#[test]
fn wrong_parameter_count_is_reported() {
    let analysis = analyze_ok(&demo("matmul.ft"));
    let err = analysis.compute_tiled_instructions(&[8, 4, 2], false).unwrap_err();
    assert_eq!(err.code, Some(codes::E0401));
    let err = analysis.parameters_satisfy_constraints(&[8]).unwrap_err();
    assert_eq!(err.code, Some(codes::E0400));
}

// ── Monotonicity ────────────────────────────────────────────────────────────

#[test]
fn constraints_only_tighten_as_the_graph_grows() {
    let full = analyze_ok(
        "fusion full {
            p0 = parameter : [96, 48]
            m = reduce(p0) {dims = [1]} : [96]
            mb = broadcast(m) {dims = [0]} : [96, 48]
            s = subtract(p0, mb) : [96, 48]
            ROOT e = exp(s) : [96, 48]
        }",
    );
    let truncated = analyze_ok(
        "fusion truncated {
            p0 = parameter : [96, 48]
            mb = parameter : [96, 48]
            s = subtract(p0, mb) : [96, 48]
            ROOT e = exp(s) : [96, 48]
        }",
    );
    let candidates = good_tilings(&[96, 48], &CandidatePolicy::MultiplesOf { step: 5 }, |_| true);
    for tiling in &candidates {
        let in_full = full.parameters_satisfy_constraints(tiling).unwrap();
        let in_truncated = truncated.parameters_satisfy_constraints(tiling).unwrap();
        assert!(!in_full || in_truncated, "{:?}", tiling);
    }
    assert!(candidates.iter().any(|t| !full.parameters_satisfy_constraints(t).unwrap()
        && truncated.parameters_satisfy_constraints(t).unwrap()));
}

// ── Backend search ──────────────────────────────────────────────────────────

#[test]
fn triton_search_respects_element_budget() {
    let analysis = analyze_ok(&demo("matmul.ft"));
    let config = TilingConfig {
        candidates: CandidatePolicy::PowersOfTwo,
        triton: TritonConstraints {
            allow_full_dimension: true,
            max_tile_elements: Some(64),
        },
    };
    let tilings: Vec<Vec<i64>> = analysis
        .good_triton_tilings(&config)
        .unwrap()
        .iter()
        .map(|t| t.to_vec())
        .collect();
    assert_eq!(tilings, vec![vec![1, 1], vec![1, 2], vec![2, 1], vec![2, 2]]);
}

#[test]
fn exhausted_search_is_empty_not_error() {
    let analysis = analyze_ok(&demo("matmul.ft"));
    let config = TilingConfig {
        candidates: CandidatePolicy::PowersOfTwo,
        triton: TritonConstraints {
            allow_full_dimension: true,
            max_tile_elements: Some(8),
        },
    };
    assert!(analysis.good_triton_tilings(&config).unwrap().is_empty());
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn gather_demo_is_not_tileable() {
    let err = analyze(&demo("gather.ft")).unwrap_err();
    assert_eq!(err.code, Some(codes::E0300));
    assert!(err.message.contains("'rows'"));
}

#[test]
fn overlapping_windows_are_rejected() {
    let err = analyze(
        "fusion pool {
            p = parameter : [32, 32]
            ROOT w = reduce_window(p) : [16, 16]
        }",
    )
    .unwrap_err();
    assert_eq!(err.code, Some(codes::E0301));
}

#[test]
fn non_contiguous_reshape_input_is_rejected() {
    let err = analyze(
        "fusion f {
            p = parameter : [8, 16]
            r = reshape(p) : [128]
            ROOT s = slice(r) {start = [0], limit = [128], stride = [2]} : [64]
        }",
    )
    .unwrap_err();
    assert_eq!(err.code, Some(codes::E0302));
}
