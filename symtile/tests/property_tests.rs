// Property-based tests for analysis invariants.
//
// Four categories:
// 1. Materialization succeeds exactly when the global constraint holds
// 2. Determinism: fresh contexts yield identical analyses
// 3. Search containment: tilings use candidate values and pass the predicate
// 4. Dedup correctness: equal structural hashes give equal concrete tiles
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;
use std::sync::Arc;

use symtile::analysis::SymbolicTileAnalysis;
use symtile::diag::codes;
use symtile::expr::{ExprContext, ExprId};
use symtile::search::{good_tilings, CandidatePolicy};

// ── Fusion generator ────────────────────────────────────────────────────────

/// Row reduction broadcast back over the input (softmax numerator).
fn row_softmax(rows: i64, cols: i64) -> String {
    format!(
        "fusion softmax {{
            p0 = parameter : [{rows}, {cols}]
            m = reduce(p0) {{dims = [1]}} : [{rows}]
            mb = broadcast(m) {{dims = [0]}} : [{rows}, {cols}]
            s = subtract(p0, mb) : [{rows}, {cols}]
            ROOT e = exp(s) : [{rows}, {cols}]
        }}"
    )
}

/// Flattening reshape of a 2-D parameter.
fn flatten(rows: i64, cols: i64) -> String {
    format!(
        "fusion flatten {{
            p = parameter : [{rows}, {cols}]
            r = reshape(p) : [{}]
            ROOT n = negate(r) : [{}]
        }}",
        rows * cols,
        rows * cols
    )
}

/// Transposed operand added to a parameter of the result shape.
fn transpose_add(rows: i64, cols: i64) -> String {
    format!(
        "fusion transpose_add {{
            a = parameter : [{cols}, {rows}]
            t = transpose(a) {{dims = [1, 0]}} : [{rows}, {cols}]
            b = parameter : [{rows}, {cols}]
            ROOT s = add(t, b) : [{rows}, {cols}]
        }}"
    )
}

fn arb_fusion() -> impl Strategy<Value = String> {
    (1i64..=24, 1i64..=24, 0usize..3).prop_map(|(rows, cols, kind)| match kind {
        0 => row_softmax(rows, cols),
        1 => flatten(rows, cols),
        _ => transpose_add(rows, cols),
    })
}

fn analyze(source: &str) -> SymbolicTileAnalysis {
    let graph = symtile::graph::computation_from_text(source);
    let comp = graph
        .computation
        .unwrap_or_else(|| panic!("graph errors: {:?}\n{}", graph.diagnostics, source));
    SymbolicTileAnalysis::analyze_computation(&comp, Arc::new(ExprContext::new()))
        .unwrap_or_else(|d| panic!("analysis failed: {}\n{}", d, source))
}

/// Fusion source plus a tile-size vector drawn within the root shape.
fn arb_fusion_and_tile() -> impl Strategy<Value = (String, Vec<i64>)> {
    arb_fusion().prop_flat_map(|source| {
        let shape = analyze(&source).root_shape().to_vec();
        let tile: Vec<_> = shape.iter().map(|&d| 1i64..=d).collect();
        (Just(source), tile)
    })
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn materializes_iff_constraints_hold((source, tile) in arb_fusion_and_tile()) {
        let analysis = analyze(&source);
        let satisfied = analysis.parameters_satisfy_constraints(&tile).unwrap();
        match analysis.compute_tiled_instructions(&tile, false) {
            Ok(tiled) => {
                prop_assert!(satisfied);
                prop_assert_eq!(tiled.tile_sizes(), tile.as_slice());
            }
            Err(diag) => {
                prop_assert!(!satisfied);
                prop_assert_eq!(diag.code, Some(codes::E0402));
                prop_assert!(!diag.cause_chain.is_empty());
            }
        }
    }

    #[test]
    fn analysis_is_deterministic(source in arb_fusion()) {
        let a = analyze(&source);
        let b = analyze(&source);
        let names = |x: &SymbolicTileAnalysis| -> Vec<String> {
            x.nodes().iter().map(|n| x.instr(n).name.clone()).collect()
        };
        prop_assert_eq!(names(&a), names(&b));
        prop_assert_eq!(a.to_string(), b.to_string());
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn search_stays_within_candidates(
        dims in prop::collection::vec(1i64..=40, 1..=3),
        policy in prop_oneof![
            Just(CandidatePolicy::PowersOfTwo),
            Just(CandidatePolicy::Divisors),
            (1i64..=8).prop_map(|step| CandidatePolicy::MultiplesOf { step }),
        ],
        modulus in 1i64..=5,
    ) {
        let predicate = |t: &[i64]| t.iter().sum::<i64>() % modulus == 0;
        let found = good_tilings(&dims, &policy, predicate);
        let all = good_tilings(&dims, &policy, |_| true);
        for tiling in &found {
            prop_assert!(predicate(tiling));
            for (&size, &dim) in tiling.iter().zip(&dims) {
                prop_assert!(policy.candidates(dim).contains(&size));
            }
        }
        let expected = all.iter().filter(|t| predicate(t)).count();
        prop_assert_eq!(found.len(), expected);
    }

    #[test]
    fn equal_hashes_give_equal_concrete_tiles((source, tile) in arb_fusion_and_tile()) {
        let analysis = analyze(&source);
        prop_assume!(analysis.parameters_satisfy_constraints(&tile).unwrap());
        let cx = analysis.context();
        let nodes = analysis.nodes();
        let index: Vec<i64> = tile.iter().map(|_| 1).collect();
        let concrete = |i: usize| {
            let t = &nodes[i].tile;
            let eval = |exprs: Vec<ExprId>, dims: &[i64]| -> Vec<i64> {
                exprs.into_iter().map(|e| cx.evaluate(e, dims, &tile).unwrap()).collect()
            };
            (eval(t.sizes(), &[]), eval(t.strides(), &[]), eval(t.offsets(), &index))
        };
        for i in 0..nodes.len() {
            for j in i + 1..nodes.len() {
                if nodes[i].hash == nodes[j].hash {
                    prop_assert_eq!(concrete(i), concrete(j));
                }
            }
        }
    }
}
