//! Subcommand implementations: training, checkpoint inspection, prediction
//! summaries and single-pair scoring.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;

use ab_ranking::{
    run_training_task, CheckpointCodec, PairPrediction, PairPredictor, PairScorerConfig,
    ProbabilityTransform,
};
use pair_store::{LocalObjectStore, ObjectStore, PredictionReader};

use crate::config::{build_training_task, load_train_toml, TaskOverrides};
use crate::results::{CheckpointSummary, PredictionFileSummary, TrainRunResult};

/// Backend used for training runs.
pub type TrainBackend = Autodiff<NdArray<f32>>;
/// Backend used for gradient-free scoring.
pub type InferBackend = NdArray<f32>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Optional training config TOML file.
    pub config: Option<PathBuf>,
    /// Object store root; overrides the config file's `[store] root`.
    pub store_root: Option<PathBuf>,
    /// Task fields given on the command line.
    pub overrides: TaskOverrides,
    /// Where to write a JSON summary of the run.
    pub results: Option<PathBuf>,
}

/// Arguments for the `inspect-checkpoint` subcommand.
#[derive(Debug)]
pub struct InspectArgs {
    /// Path to the checkpoint file.
    pub checkpoint: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// Path to the predictions Parquet file.
    pub input: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Arguments for the `predict` subcommand.
#[derive(Debug)]
pub struct PredictArgs {
    /// Path to the checkpoint file.
    pub checkpoint: PathBuf,
    /// Embedding of the first item.
    pub x: Vec<f32>,
    /// Embedding of the second item.
    pub y: Vec<f32>,
    /// Transform used to turn the two scores into a probability.
    pub transform: ProbabilityTransform,
}

/// Train a scorer on a dataset in the local object store and upload its
/// checkpoint, report, model card and predictions next to the dataset.
pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainRunResult> {
    let start = Instant::now();

    // 1. Resolve task and store location
    let (file_task, file_root) = match &args.config {
        Some(path) => {
            let toml = load_train_toml(path)?;
            (Some(toml.task), Some(toml.store.root))
        }
        None => (None, None),
    };
    let task = build_training_task(file_task, &args.overrides)?;
    let store_root = args
        .store_root
        .or(file_root)
        .unwrap_or_else(|| PathBuf::from("data"));

    tracing::info!(
        dataset = %task.dataset_name,
        store = %store_root.display(),
        epochs = task.epochs,
        batch_size = task.training_batch_size,
        lr = task.learning_rate,
        transform = %task.transform,
        "Starting training task"
    );

    // 2. Train and upload
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&store_root));
    let device = Default::default();
    let artifacts = run_training_task::<TrainBackend>(&task, store, &device)
        .with_context(|| format!("Training on dataset '{}' failed", task.dataset_name))?;

    // 3. Summarize
    let result = TrainRunResult::from_artifacts(
        &task.dataset_name,
        &store_root,
        &artifacts,
        start.elapsed().as_secs_f64(),
    );
    if let Some(path) = &args.results {
        result.save_json(path)?;
        tracing::info!(path = %path.display(), "Wrote run results");
    }

    println!("\n--- Training Summary ---");
    println!("Dataset: {}", result.dataset_name);
    println!("Epochs: {}", result.epochs);
    if let (Some(train), Some(val)) = (result.final_training_loss, result.final_validation_loss) {
        println!("Final loss: train={train:.4} validation={val:.4}");
    }
    println!(
        "Accuracy: train={:.2}% validation={:.2}%",
        result.training_accuracy * 100.0,
        result.validation_accuracy * 100.0
    );
    println!("Checkpoint: {}", result.checkpoint_path);
    println!("Model hash: {}", result.model_hash);
    println!("Elapsed: {:.1}s", result.elapsed_secs);

    Ok(result)
}

/// Decode a checkpoint, verify its hash and print its metadata.
pub fn run_inspect_checkpoint(args: InspectArgs) -> anyhow::Result<CheckpointSummary> {
    let blob = std::fs::read(&args.checkpoint)
        .with_context(|| format!("Failed to read {}", args.checkpoint.display()))?;
    let decoded = CheckpointCodec::decode(&blob)
        .with_context(|| format!("Checkpoint {} is invalid", args.checkpoint.display()))?;

    let total_parameters = decoded
        .parameter_shapes
        .iter()
        .map(|(_, shape)| shape.iter().product::<usize>())
        .sum();
    let summary = CheckpointSummary {
        model_dict_bytes: decoded.model_dict_len(),
        metadata: decoded.metadata,
        parameter_shapes: decoded.parameter_shapes,
        total_parameters,
        hash_verified: true,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("--- Checkpoint ---");
        println!("File: {}", args.checkpoint.display());
        println!("Model type: {}", summary.metadata.model_type);
        println!("Model path: {}", summary.metadata.file_path);
        println!("Model hash: {} (verified)", summary.metadata.model_hash);
        println!("Date: {}", summary.metadata.date);
        println!("Parameters: {} ({} bytes)", summary.total_parameters, summary.model_dict_bytes);
        for (name, shape) in &summary.parameter_shapes {
            println!("  {name}: {shape:?}");
        }
    }
    Ok(summary)
}

/// Print statistics from a predictions Parquet file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<PredictionFileSummary> {
    let records = PredictionReader::read_all(&args.input)
        .with_context(|| format!("Failed to read predictions {}", args.input.display()))?;
    let summary = PredictionFileSummary::from_records(&records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(summary);
    }

    let s = &summary.summary;
    println!("--- Prediction Summary ---");
    println!("File: {}", args.input.display());
    println!("Total records: {}", s.total_records);
    println!(
        "Training: {}/{} correct ({:.1}%)",
        s.training_correct,
        s.training_count,
        summary.training_accuracy * 100.0
    );
    println!(
        "Validation: {}/{} correct ({:.1}%)",
        s.validation_correct,
        s.validation_count,
        summary.validation_accuracy * 100.0
    );
    for (label, stats) in [
        ("Training", &summary.training_scores),
        ("Validation", &summary.validation_scores),
    ] {
        if let Some(st) = stats {
            println!(
                "{label} scores: min={:.4} max={:.4} mean={:.4} median={:.4}",
                st.min, st.max, st.mean, st.median
            );
        }
    }
    Ok(summary)
}

/// Score one embedding pair with a checkpointed scorer.
pub fn run_predict(args: PredictArgs) -> anyhow::Result<PairPrediction> {
    let blob = std::fs::read(&args.checkpoint)
        .with_context(|| format!("Failed to read {}", args.checkpoint.display()))?;
    let decoded = CheckpointCodec::decode(&blob)
        .with_context(|| format!("Checkpoint {} is invalid", args.checkpoint.display()))?;

    let device = Default::default();
    let template = PairScorerConfig::from_parameter_shapes(&decoded.parameter_shapes)?
        .init::<InferBackend>(&device);
    let predictor = PairPredictor::<InferBackend, _>::from_checkpoint(&template, &blob, args.transform, device)?;
    let prediction = predictor.predict_pair(&args.x, &args.y)?;

    println!("score_x: {:.6}", prediction.score_x);
    println!("score_y: {:.6}", prediction.score_y);
    println!("p(x preferred) [{}]: {:.6}", args.transform, prediction.probability);
    Ok(prediction)
}
