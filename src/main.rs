// ========================================================================================
//
//                              The siren command-line tool
//
// ========================================================================================
//
// Loads an expression matrix and a candidate network from tab-separated files, scores
// every edge, and either writes the scores or checks them against a reference result.
// All numeric work happens in the library; this file owns argument parsing, the rayon
// pool, progress display and the exit status.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use siren::engine::ScoreStage;
use siren::io::{
    GeneLabels, load_edge_list, load_expression_matrix, load_labelled_expression,
    load_named_edge_list, load_reference_scores, load_weight_matrix, write_scores,
    write_scores_file,
};
use siren::verify::compare_scores;
use siren::{
    EdgeList, ExpressionMatrix, ScoreEngine, ScoreProgressObserver, ScoreVector, SirenConfig,
    WeightMatrix,
};
use std::error::Error;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Parser)]
#[command(
    name = "siren",
    version,
    about = "Score the edges of a gene regulatory network from expression data with SIREN."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a score for every edge of a network
    Score(ScoreArgs),
    /// Recompute scores and compare them with a reference result file
    Verify(VerifyArgs),
    /// Print the effective configuration as TOML
    Config {
        /// Configuration file to load instead of the defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Tab-separated expression matrix, one gene per row and one condition per column
    expression: PathBuf,

    /// Tab-separated network, one edge per row given by its first two columns
    network: PathBuf,

    /// Tab-separated bins × bins weight matrix (defaults to the built-in table)
    #[arg(long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The expression file starts with a gene identifier column and the network names genes
    #[arg(long)]
    gene_ids: bool,

    /// Network indices start at 0 instead of 1
    #[arg(long)]
    zero_based: bool,

    /// Number of worker threads (defaults to all available cores)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

#[derive(Args)]
struct ScoreArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output file (defaults to standard output)
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Reference result file whose fourth column holds the expected score
    result: PathBuf,

    /// Largest accepted absolute difference (overrides the configuration)
    #[arg(long)]
    tolerance: Option<f64>,
}

// ========================================================================================
//                                   Progress display
// ========================================================================================

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

#[derive(Default)]
struct TerminalProgress {
    bar: Option<ProgressBar>,
}

impl ScoreProgressObserver for TerminalProgress {
    fn on_stage_start(&mut self, stage: ScoreStage, total: usize) {
        self.bar = Some(create_progress_bar(total as u64, stage.describe()));
    }

    fn on_stage_advance(&mut self, stage: ScoreStage, processed: usize) {
        let _ = stage;
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: ScoreStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

// ========================================================================================
//                                    Orchestration
// ========================================================================================

struct LoadedInputs {
    config: SirenConfig,
    expression: ExpressionMatrix,
    edges: EdgeList,
    gene_names: Option<Vec<String>>,
    weights: Option<WeightMatrix>,
}

impl LoadedInputs {
    fn labels(&self) -> GeneLabels<'_> {
        match &self.gene_names {
            Some(names) => GeneLabels::Names(names),
            None => GeneLabels::Indices {
                one_based: self.config.one_based_network,
            },
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SirenConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            eprintln!("> Loading configuration from '{}'", path.display());
            Ok(SirenConfig::load(path)?)
        }
        None => Ok(SirenConfig::default()),
    }
}

fn configure_threads(threads: Option<usize>) -> Result<(), Box<dyn Error>> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = threads {
        if threads == 0 {
            return Err("--threads must be at least 1.".into());
        }
        builder = builder.num_threads(threads);
    }
    builder.build_global()?;
    Ok(())
}

fn load_inputs(args: &InputArgs) -> Result<LoadedInputs, Box<dyn Error>> {
    configure_threads(args.threads)?;

    let mut config = load_config(args.config.as_ref())?;
    if args.zero_based {
        config.one_based_network = false;
    }

    eprintln!("> Reading expression data from '{}'", args.expression.display());
    let (expression, edges, gene_names) = if args.gene_ids {
        let labelled = load_labelled_expression(&args.expression)?;
        eprintln!("> Reading named network from '{}'", args.network.display());
        let edges = load_named_edge_list(&args.network, &labelled)?;
        (labelled.matrix, edges, Some(labelled.gene_ids))
    } else {
        let expression = load_expression_matrix(&args.expression)?;
        eprintln!("> Reading network from '{}'", args.network.display());
        let edges = load_edge_list(&args.network, config.one_based_network)?;
        (expression, edges, None)
    };

    let weights = match &args.weights {
        Some(path) => {
            eprintln!("> Reading weight matrix from '{}'", path.display());
            Some(load_weight_matrix(path)?)
        }
        None => None,
    };

    Ok(LoadedInputs {
        config,
        expression,
        edges,
        gene_names,
        weights,
    })
}

fn compute(inputs: &LoadedInputs) -> Result<ScoreVector, Box<dyn Error>> {
    eprintln!(
        "> Scoring {} edges across {} genes and {} conditions",
        inputs.edges.len(),
        inputs.expression.num_genes(),
        inputs.expression.num_conditions()
    );
    let start = Instant::now();
    let engine = ScoreEngine::new(inputs.config.spline)?.with_parallel(inputs.config.parallel);
    let mut progress = TerminalProgress::default();
    let scores = engine.compute_scores_with_progress(
        &inputs.expression,
        &inputs.edges,
        inputs.weights.as_ref(),
        &mut progress,
    )?;
    eprintln!("> Scored {} edges in {:.2?}", scores.len(), start.elapsed());
    Ok(scores)
}

fn run_score(args: ScoreArgs) -> Result<(), Box<dyn Error>> {
    let inputs = load_inputs(&args.input)?;
    let scores = compute(&inputs)?;
    let labels = inputs.labels();

    match &args.output {
        Some(path) => {
            write_scores_file(path, &inputs.edges, &scores, &labels)?;
            eprintln!("> Wrote scores to '{}'", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_scores(&mut writer, &inputs.edges, &scores, &labels)?;
            writer.flush()?;
        }
    }
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<(), Box<dyn Error>> {
    let inputs = load_inputs(&args.input)?;
    let tolerance = args.tolerance.unwrap_or(inputs.config.tolerance);
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(format!("The tolerance must be finite and non-negative, got {tolerance}.").into());
    }

    eprintln!("> Reading reference scores from '{}'", args.result.display());
    let expected = load_reference_scores(&args.result)?;
    let scores = compute(&inputs)?;

    let mismatches = compare_scores(&scores.to_vec(), &expected, tolerance)?;
    for mismatch in &mismatches {
        let (a, b) = inputs.edges[mismatch.edge];
        eprintln!(
            "  Edge {} ({a}, {b}): computed {}, expected {}, difference {:e}",
            mismatch.edge + 1,
            mismatch.computed,
            mismatch.expected,
            mismatch.difference
        );
    }

    if mismatches.is_empty() {
        eprintln!(
            "> All {} scores match the reference within {tolerance:e}",
            scores.len()
        );
        Ok(())
    } else {
        Err(format!(
            "{} of {} scores differ from the reference by more than {tolerance:e}.",
            mismatches.len(),
            scores.len()
        )
        .into())
    }
}

fn run_config(path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let config = load_config(path.as_ref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Score(args)) => run_score(args),
        Some(Commands::Verify(args)) => run_verify(args),
        Some(Commands::Config { config }) => run_config(config),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
