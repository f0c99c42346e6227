use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use phpfold_core::analysis::{
    analyze, band, cognitive_complexity, cyclomatic_complexity, EffectDependencyGraph,
};
use phpfold_core::{
    Classifier, ConsoleDiagnosticHandler, Inliner, OptimizerConfig, Pipeline, PASS_TABLE,
};

/// phpfold - a source-to-source optimizer for PHP scripts
#[derive(Parser, Debug)]
#[command(name = "phpfold")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Entry file; its static includes are resolved relative to it
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Write output here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Path to phpfold.json configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a default phpfold.json and exit
    #[arg(long)]
    init: bool,

    /// List the registered passes and exit
    #[arg(long)]
    list_passes: bool,

    /// Maximum fixed-point rounds
    #[arg(long, value_name = "N")]
    max_rounds: Option<usize>,

    /// Keep comments in the output
    #[arg(long)]
    keep_comments: bool,

    /// Disable the sandbox pre-execution pass
    #[arg(long)]
    no_pre_execute: bool,

    /// Disable function/class inlining
    #[arg(long)]
    no_inline: bool,

    /// Report which pass changed the tree in each round
    #[arg(long)]
    show_passes: bool,

    /// Print effect/complexity analysis instead of optimizing
    #[arg(long)]
    analyze: bool,
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug for detailed logs.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.init {
        let path = PathBuf::from("phpfold.json");
        OptimizerConfig::init_file(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    if cli.list_passes {
        for descriptor in PASS_TABLE {
            println!("{:<24} {}", descriptor.id, descriptor.description);
        }
        return Ok(());
    }

    let Some(file) = cli.file.clone() else {
        eprintln!("error: no input file. Use --help for usage information.");
        std::process::exit(1);
    };

    let mut config = match &cli.config {
        Some(path) => OptimizerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OptimizerConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    if cli.analyze {
        return analyze_file(&file);
    }

    info!("optimizing {}", file.display());
    debug!("round cap: {}", config.optimizer_options.max_rounds);

    let handler = Arc::new(ConsoleDiagnosticHandler::new(cli.show_passes));
    let mut pipeline = Pipeline::new(config, handler);
    let output = pipeline
        .run_file(&file)
        .with_context(|| format!("optimizing {}", file.display()))?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, output).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => print!("{output}"),
    }

    if pipeline.still_changing {
        eprintln!("note: round cap reached before a fixed point; output is valid but may not be fully reduced");
    }
    Ok(())
}

/// Flatten includes, then report effect kinds, complexity, extraction
/// candidates, and reorderability without touching the program.
fn analyze_file(file: &Path) -> anyhow::Result<()> {
    let handler = Arc::new(ConsoleDiagnosticHandler::new(false));
    let mut inliner = Inliner::new(handler.as_ref());
    let program = inliner
        .inline_entry(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let classifier = Classifier::new();
    let graph = EffectDependencyGraph::build(&program.tree, &program.roots, &classifier);
    let (order, skipped) = graph.topological_sort();

    println!("statements: {}", program.roots.len());
    for &stmt in &program.roots {
        let span = program.tree.span(stmt);
        let kind = classifier.classify(&program.tree, stmt);
        let cognitive = cognitive_complexity(&program.tree, &[stmt]);
        println!(
            "  {:<16} {:<16} cognitive {:>3} ({})",
            format!("{span}"),
            kind.label(),
            cognitive,
            band(cognitive).label()
        );
    }

    let cognitive = cognitive_complexity(&program.tree, &program.roots);
    let cyclomatic = cyclomatic_complexity(&program.tree, &program.roots);
    println!("cognitive complexity: {cognitive} ({})", band(cognitive).label());
    println!("cyclomatic complexity: {cyclomatic} ({})", band(cyclomatic).label());

    let analysis = analyze(&program.tree, &program.roots, &classifier);
    println!("effect groups: {}", analysis.groups.len());
    for candidate in &analysis.function_candidates {
        println!(
            "  extraction candidate {} (priority {}, {} statement(s), {} param(s))",
            candidate.name_hint,
            candidate.priority,
            candidate.size,
            candidate.params.len()
        );
    }
    for improvement in &analysis.improvements {
        println!("  note: {}", improvement.description);
    }

    let reorderable = order.iter().filter(|key| graph.can_reorder(key)).count();
    println!("reorderable statements: {reorderable}/{}", graph.len());
    if skipped > 0 {
        println!("dependency cycles skipped in ordering: {skipped}");
    }
    Ok(())
}

fn apply_overrides(config: &mut OptimizerConfig, cli: &Cli) {
    let options = &mut config.optimizer_options;
    if let Some(max_rounds) = cli.max_rounds {
        options.max_rounds = max_rounds.max(1);
    }
    if cli.keep_comments {
        options.strip_comments = false;
    }
    if cli.no_pre_execute {
        options.pre_execute = false;
    }
    if cli.no_inline {
        options.inline_functions = false;
        options.inline_classes = false;
    }
}
