use std::path::PathBuf;

use ab_ranking::ProbabilityTransform;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ranking_cli::config::TaskOverrides;
use ranking_cli::pipeline::{self, InspectArgs, PredictArgs, SummaryArgs, TrainArgs};

/// ab-ranking: learn embedding scores from pairwise preference labels.
#[derive(Parser)]
#[command(name = "ab-ranking", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training, checkpoint inspection and scoring.
#[derive(Subcommand)]
enum Command {
    /// Train a scorer on a dataset and upload checkpoint, report and predictions.
    Train {
        /// Path to training config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Root directory of the local object store (default: data).
        #[arg(long)]
        store_root: Option<PathBuf>,
        /// Dataset name; pairs are read from `datasets/{name}/pairs/*.json`.
        #[arg(long)]
        dataset: Option<String>,
        /// Number of epochs, including the validation-only epoch 0.
        #[arg(long)]
        epochs: Option<usize>,
        /// AdamW learning rate.
        #[arg(long)]
        learning_rate: Option<f64>,
        /// Capacity of the training buffer, in pairs.
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Fraction of pairs used for training; the rest is validation.
        #[arg(long)]
        train_percent: Option<f64>,
        /// Pairs per optimizer step.
        #[arg(long)]
        batch_size: Option<usize>,
        /// AdamW weight decay.
        #[arg(long)]
        weight_decay: Option<f64>,
        /// Probability transform: elo, bradley-terry-sigmoid or bradley-terry-ratio.
        #[arg(long)]
        transform: Option<ProbabilityTransform>,
        /// Buffer fill worker threads.
        #[arg(long)]
        num_workers: Option<usize>,
        /// Seed for the split and epoch shuffles.
        #[arg(long)]
        seed: Option<u64>,
        /// Cache decoded training pairs in memory.
        #[arg(long)]
        load_to_ram: bool,
        /// Enable shape, range, symmetry and per-parameter NaN checks.
        #[arg(long)]
        debug_asserts: bool,
        /// Path to write a JSON summary of the run.
        #[arg(long)]
        results: Option<PathBuf>,
    },
    /// Decode a checkpoint, verify its hash and print its metadata.
    InspectCheckpoint {
        /// Path to the checkpoint file.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// Print statistics from a predictions Parquet file.
    Summary {
        /// Path to the predictions Parquet file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// Score one embedding pair with a checkpointed scorer.
    Predict {
        /// Path to the checkpoint file.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Comma-separated embedding of the first item.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        x: Vec<f32>,
        /// Comma-separated embedding of the second item.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        y: Vec<f32>,
        /// Probability transform for the pair.
        #[arg(long, default_value = "elo")]
        transform: ProbabilityTransform,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            store_root,
            dataset,
            epochs,
            learning_rate,
            buffer_size,
            train_percent,
            batch_size,
            weight_decay,
            transform,
            num_workers,
            seed,
            load_to_ram,
            debug_asserts,
            results,
        } => pipeline::run_train(TrainArgs {
            config,
            store_root,
            overrides: TaskOverrides {
                dataset_name: dataset,
                epochs,
                learning_rate,
                buffer_size,
                train_percent,
                training_batch_size: batch_size,
                weight_decay,
                transform,
                num_workers,
                seed,
                load_to_ram,
                debug_asserts,
            },
            results,
        })
        .map(|_| ()),
        Command::InspectCheckpoint { checkpoint, json } => {
            pipeline::run_inspect_checkpoint(InspectArgs { checkpoint, json }).map(|_| ())
        }
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }).map(|_| ()),
        Command::Predict {
            checkpoint,
            x,
            y,
            transform,
        } => pipeline::run_predict(PredictArgs {
            checkpoint,
            x,
            y,
            transform,
        })
        .map(|_| ()),
    }
}
