//! CLI for running the refinement loop on ARC tasks.
//!
//! # Usage
//!
//! ```bash
//! # Default tasks from the training folder
//! cargo run -p ps-generator --bin ps-refine
//!
//! # Specific tasks, bounded
//! cargo run -p ps-generator --bin ps-refine -- --task 3c9b0459 --task 0d3d703e --max-iterations 10
//!
//! # With a configuration file
//! cargo run -p ps-generator --bin ps-refine -- --config refine.json --verbose
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ps_core::{Catalogue, TaskRef};
use ps_evaluators::Pipeline;
use ps_generator::{
    ModelClient, OllamaClient, RefineConfig, RefinementLoop, ReplayClient, TaskFetcher,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Tasks run when none are given.
const DEFAULT_TASKS: &[&str] = &["3c9b0459", "0d3d703e", "253bf280"];

#[derive(Debug, Parser)]
#[command(name = "ps-refine", about = "Model-guided partial-specialization search for ARC tasks")]
struct Args {
    /// Dataset folder
    #[arg(long, default_value = "training")]
    folder: String,

    /// Task id (repeatable; tasks run in order)
    #[arg(long = "task")]
    tasks: Vec<String>,

    /// Model identifier (overrides PS_MODEL and the config file)
    #[arg(long)]
    model: Option<String>,

    /// Engine source tree
    #[arg(long)]
    source_root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many iterations per task
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Stop starting new iterations after this many seconds per task
    #[arg(long)]
    time_budget_secs: Option<u64>,

    /// Directory for prompt and output artifacts
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Serve this persisted model output instead of calling the model
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// Log every phase transition
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut RefineConfig) {
        if let Some(ref model) = self.model {
            config.model = Some(model.clone());
        }
        if let Some(ref root) = self.source_root {
            config.source_root = Some(root.clone());
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = Some(max);
        }
        if let Some(secs) = self.time_budget_secs {
            config.time_budget_secs = Some(secs);
        }
        if let Some(ref dir) = self.artifact_dir {
            config.artifact_dir = Some(dir.clone());
        }
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match args.config {
        Some(ref path) => match RefineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => RefineConfig::default(),
    };
    config.apply_env();
    args.apply(&mut config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let client: Box<dyn ModelClient> = match args.replay {
        Some(ref path) => Box::new(ReplayClient::new(path)),
        None => Box::new(OllamaClient::new(config.client_config())),
    };
    let layout = config.layout();
    let refinement = RefinementLoop::new(
        client,
        Pipeline::from_config(config.pipeline_config()),
        layout.clone(),
        config.loop_config(),
    )
    .with_cancellation(cancel.clone());

    let fetcher = match config.task_base_url {
        Some(ref url) => TaskFetcher::new(url.clone()),
        None => TaskFetcher::default(),
    };

    let tasks: Vec<String> = if args.tasks.is_empty() {
        DEFAULT_TASKS.iter().map(|t| t.to_string()).collect()
    } else {
        args.tasks.clone()
    };

    println!("Partial-Specialization Refinement");
    println!("=================================");
    println!();
    println!("Model: {}", refinement.config().model);
    println!("Primitives: {}", layout.primitives.display());
    println!("Tasks: {}", tasks.join(", "));
    println!();

    let mut all_solved = true;

    for id in tasks {
        if cancel.is_cancelled() {
            all_solved = false;
            break;
        }
        let task_ref = TaskRef::new(args.folder.clone(), id);

        let task = match fetcher.fetch(&task_ref).await {
            Ok(task) => task,
            Err(e) => {
                eprintln!("Error fetching {}: {}", task_ref, e);
                all_solved = false;
                continue;
            }
        };

        let catalogue = match Catalogue::from_file(&layout.primitives) {
            Ok(catalogue) => catalogue,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };

        match refinement.run(&task_ref, &task, &catalogue).await {
            Ok(outcome) => {
                println!("{}", outcome.format_summary());
                if outcome.is_solved() {
                    println!("{}", outcome.best_expression);
                } else {
                    all_solved = false;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if all_solved {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
