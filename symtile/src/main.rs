// main.rs — symtile command-line driver
//
// Reads a fusion file, runs the symbolic tile analysis and prints the stage
// selected by `--emit`.
//
// Preconditions: `source` names a readable fusion text file.
// Postconditions: the selected output on stdout; exit status 0.
// Failure modes: diagnostics exit with 1; I/O, config and usage errors exit
//                with 2.
// Side effects: writes stdout and stderr.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use symtile::analysis::SymbolicTileAnalysis;
use symtile::config::TilingConfig;
use symtile::diag::Diagnostic;
use symtile::expr::ExprContext;
use symtile::graph::fmt_dims;
use symtile::report::AnalysisReport;
use symtile::search::CandidatePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Analysis,
    Tilings,
    Tiled,
    Json,
    Dot,
}

#[derive(Parser, Debug)]
#[command(
    name = "symtile",
    version,
    about = "Symbolic tiling analysis for fused tensor computations"
)]
struct Cli {
    /// Input fusion source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Analysis)]
    emit: EmitStage,

    /// Concrete tile sizes, one per root dimension (e.g. `16,32`)
    #[arg(long, value_delimiter = ',')]
    tile: Vec<i64>,

    /// Compute tile-offset maps for every node of the tiled computation
    #[arg(long)]
    all_offset_maps: bool,

    /// Candidate tile sizes for the search: pow2, divisors or multiples:N
    #[arg(long)]
    candidates: Option<CandidatePolicy>,

    /// Element budget for one tile (sizes padded to powers of two)
    #[arg(long)]
    max_tile_elements: Option<i64>,

    /// JSON tiling configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("symtile: source = {}", cli.source.display());
        eprintln!("symtile: emit   = {:?}", cli.emit);
    }

    if cli.emit == EmitStage::Tiled && cli.tile.is_empty() {
        eprintln!("symtile: error: --emit tiled requires --tile");
        std::process::exit(2);
    }

    // ── Configuration ──
    let mut config = match &cli.config {
        Some(path) => match TilingConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("symtile: error: {}", e);
                std::process::exit(2);
            }
        },
        None => TilingConfig::default(),
    };
    if let Some(policy) = cli.candidates {
        config.candidates = policy;
    }
    if let Some(max) = cli.max_tile_elements {
        config.triton.max_tile_elements = Some(max);
    }
    if cli.verbose {
        eprintln!(
            "symtile: candidates = {}, max tile elements = {}",
            config.candidates,
            config
                .triton
                .max_tile_elements
                .map_or_else(|| "unbounded".to_string(), |m| m.to_string())
        );
    }

    // ── Read and build the fusion ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("symtile: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let start = Instant::now();
    let graph = symtile::graph::computation_from_text(&source);
    for diag in &graph.diagnostics {
        report_diagnostic(&cli.source, &source, diag);
    }
    let comp = match graph.computation {
        Some(c) => c,
        None => std::process::exit(1),
    };
    if cli.verbose {
        eprintln!(
            "symtile: built fusion '{}' with {} instructions in {:?}",
            comp.name,
            comp.len(),
            start.elapsed()
        );
    }

    // ── Analysis ──
    let start = Instant::now();
    let analysis = match SymbolicTileAnalysis::analyze_computation(&comp, Arc::new(ExprContext::new()))
    {
        Ok(a) => a,
        Err(diag) => {
            report_diagnostic(&cli.source, &source, &diag);
            std::process::exit(1);
        }
    };
    if cli.verbose {
        eprintln!(
            "symtile: analysis: {} tiled nodes, {} expressions in {:?}",
            analysis.nodes().len(),
            analysis.context().len(),
            start.elapsed()
        );
    }

    // ── Emit ──
    let output = match emit(&cli, &config, &analysis) {
        Ok(text) => text,
        Err(diag) => {
            report_diagnostic(&cli.source, &source, &diag);
            std::process::exit(1);
        }
    };
    print!("{}", output);
}

fn emit(
    cli: &Cli,
    config: &TilingConfig,
    analysis: &SymbolicTileAnalysis,
) -> Result<String, Diagnostic> {
    match cli.emit {
        EmitStage::Analysis => Ok(analysis.to_string()),
        EmitStage::Dot => Ok(symtile::dot::emit_dot(analysis)),
        EmitStage::Tilings => {
            let start = Instant::now();
            let tilings = analysis.good_triton_tilings(config)?;
            if cli.verbose {
                eprintln!(
                    "symtile: search: {} valid tilings in {:?}",
                    tilings.len(),
                    start.elapsed()
                );
            }
            Ok(tilings
                .iter()
                .map(|t| format!("{}\n", fmt_dims(t)))
                .collect())
        }
        EmitStage::Tiled => {
            let start = Instant::now();
            let tiled = analysis.compute_tiled_instructions(&cli.tile, cli.all_offset_maps)?;
            if cli.verbose {
                eprintln!(
                    "symtile: materialized {} tiled nodes in {:?}",
                    tiled.nodes().len(),
                    start.elapsed()
                );
            }
            Ok(tiled.to_string())
        }
        EmitStage::Json => {
            let tilings = analysis.good_triton_tilings(config)?;
            let mut report = AnalysisReport::new(analysis).with_tilings(&tilings);
            if !cli.tile.is_empty() {
                let tiled = analysis.compute_tiled_instructions(&cli.tile, cli.all_offset_maps)?;
                report = report.with_tiled(analysis, &tiled);
            }
            Ok(report.to_json())
        }
    }
}

/// Print a diagnostic to stderr, prefixed with `file:line:col` when it has a
/// source span.
fn report_diagnostic(path: &Path, source: &str, diag: &Diagnostic) {
    match diag.span {
        Some(span) => {
            let (line, col) = line_col(source, span.start);
            eprintln!("symtile: {}:{}:{}: {}", path.display(), line, col, diag);
        }
        None => eprintln!("symtile: {}", diag),
    }
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}
