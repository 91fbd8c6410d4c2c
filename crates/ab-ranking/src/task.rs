//! End-to-end training task: load a dataset from the object store, train a
//! scorer, and publish the checkpoint, report, model card and predictions.

use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use pair_store::{model_output_prefix, ObjectStore, PredictionWriter, DATASETS_BUCKET};

use crate::checkpoint::{today, CheckpointCodec, ModelMetadata};
use crate::error::{RankingError, TrainingPhase};
use crate::model::scorer::{PairScorerConfig, ScoreNetwork};
use crate::report::TrainReport;
use crate::training::data::{LoaderConfig, PairedDatasetLoader};
use crate::training::metrics::{AccuracyStats, MetricsHistory};
use crate::training::source::ObjectStoreSource;
use crate::training::trainer::{train, TrainingConfig};
use crate::training::transform::ProbabilityTransform;

fn default_batch_size() -> usize {
    1
}

fn default_weight_decay() -> f64 {
    0.01
}

fn default_num_workers() -> usize {
    2
}

fn default_starvation_timeout_ms() -> u64 {
    30_000
}

fn default_hidden1() -> usize {
    512
}

fn default_hidden2() -> usize {
    64
}

fn default_dropout() -> f64 {
    0.1
}

/// Descriptor of one training run, consumed once at initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingTask {
    pub dataset_name: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub buffer_size: usize,
    pub train_percent: f64,
    #[serde(default = "default_batch_size")]
    pub training_batch_size: usize,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default)]
    pub load_to_ram: bool,
    #[serde(default)]
    pub transform: ProbabilityTransform,
    #[serde(default)]
    pub debug_asserts: bool,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_starvation_timeout_ms")]
    pub starvation_timeout_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_hidden1")]
    pub hidden1: usize,
    #[serde(default = "default_hidden2")]
    pub hidden2: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

impl TrainingTask {
    /// A task with the given required fields and defaults for everything else.
    pub fn new(
        dataset_name: impl Into<String>,
        epochs: usize,
        learning_rate: f64,
        buffer_size: usize,
        train_percent: f64,
    ) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            epochs,
            learning_rate,
            buffer_size,
            train_percent,
            training_batch_size: default_batch_size(),
            weight_decay: default_weight_decay(),
            load_to_ram: false,
            transform: ProbabilityTransform::default(),
            debug_asserts: false,
            num_workers: default_num_workers(),
            starvation_timeout_ms: default_starvation_timeout_ms(),
            seed: None,
            hidden1: default_hidden1(),
            hidden2: default_hidden2(),
            dropout: default_dropout(),
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::new()
            .with_buffer_size(self.buffer_size)
            .with_train_percent(self.train_percent)
            .with_num_workers(self.num_workers)
            .with_starvation_timeout_ms(self.starvation_timeout_ms)
            .with_load_to_ram(self.load_to_ram)
            .with_seed(self.seed)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new()
            .with_epochs(self.epochs)
            .with_batch_size(self.training_batch_size)
            .with_learning_rate(self.learning_rate)
            .with_weight_decay(self.weight_decay)
            .with_transform(self.transform)
            .with_debug_asserts(self.debug_asserts)
    }

    pub fn scorer_config(&self, input_dim: usize) -> PairScorerConfig {
        PairScorerConfig::new(input_dim)
            .with_hidden1(self.hidden1)
            .with_hidden2(self.hidden2)
            .with_dropout(self.dropout)
    }

    /// Reject the task before any data is read.
    pub fn validate(&self) -> Result<(), RankingError> {
        if self.dataset_name.trim().is_empty() {
            return Err(RankingError::InvalidConfig("dataset_name must not be empty".into()));
        }
        if self.hidden1 == 0 || self.hidden2 == 0 {
            return Err(RankingError::InvalidConfig("hidden layer sizes must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(RankingError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        self.training_config().validate()?;
        self.loader_config().validate()
    }
}

/// Object paths of everything a training task published.
#[derive(Debug, Clone)]
pub struct TrainingArtifacts {
    pub checkpoint_path: String,
    pub report_path: String,
    pub model_card_path: String,
    pub predictions_path: String,
    pub metadata: ModelMetadata,
    pub history: MetricsHistory,
    pub accuracy: AccuracyStats,
}

/// Output object paths for a dataset and date, without extension.
pub fn output_stem(dataset_name: &str, date: &str) -> String {
    format!("{}/{date}", model_output_prefix(dataset_name))
}

/// Run a training task against `store` and upload its artifacts.
pub fn run_training_task<B: AutodiffBackend>(
    task: &TrainingTask,
    store: Arc<dyn ObjectStore>,
    device: &B::Device,
) -> Result<TrainingArtifacts, RankingError> {
    task.validate()?;

    let source = Arc::new(ObjectStoreSource::new(Arc::clone(&store)));
    let mut loader = PairedDatasetLoader::new(&task.dataset_name, source, task.loader_config())?;
    let load_report = loader
        .load_dataset()
        .map_err(|e| e.during(TrainingPhase::Init, 0, 0))?;

    let training_config = task.training_config();
    let model = task
        .scorer_config(load_report.embedding_dim)
        .init::<B>(device);
    let outcome = train(&training_config, model, &mut loader, device)?;
    let trained = outcome.model.valid();

    let at_checkpoint = |e: RankingError| e.during(TrainingPhase::Checkpoint, task.epochs, 0);
    let date = today();
    let stem = output_stem(&task.dataset_name, &date);
    let checkpoint_path = format!("{stem}.ckpt");
    let report_path = format!("{stem}.txt");
    let model_card_path = format!("{stem}.json");
    let predictions_path = format!("{stem}.parquet");

    let metadata = CheckpointCodec::save_dated::<B::InnerBackend, _>(
        &trained,
        store.as_ref(),
        DATASETS_BUCKET,
        &checkpoint_path,
        &date,
    )
    .map_err(at_checkpoint)?;

    let parameter_shapes = trained.parameter_shapes();
    let report = TrainReport {
        metadata: &metadata,
        dataset_path: format!("{DATASETS_BUCKET}/{}", task.dataset_name),
        train_percent: task.train_percent,
        training_size: load_report.training_pairs,
        validation_size: load_report.validation_pairs,
        rejected: load_report.rejected.len(),
        config: &training_config,
        history: &outcome.history,
        evaluation: &outcome.evaluation,
        target_stats: load_report.target_stats,
        parameter_shapes: &parameter_shapes,
    };
    store
        .put(DATASETS_BUCKET, &report_path, report.render_text().as_bytes())
        .map_err(|e| at_checkpoint(e.into()))?;

    let card = report
        .model_card(&predictions_path)
        .to_json()
        .map_err(|e| at_checkpoint(export_error("model card", e)))?;
    store
        .put(DATASETS_BUCKET, &model_card_path, &card)
        .map_err(|e| at_checkpoint(e.into()))?;

    let mut writer = PredictionWriter::new();
    writer.record_all(outcome.evaluation.predictions.iter().cloned());
    let parquet = writer
        .into_bytes()
        .map_err(|e| at_checkpoint(export_error("predictions", e)))?;
    store
        .put(DATASETS_BUCKET, &predictions_path, &parquet)
        .map_err(|e| at_checkpoint(e.into()))?;

    tracing::info!(
        checkpoint = %checkpoint_path,
        report = %report_path,
        model_card = %model_card_path,
        predictions = %predictions_path,
        "Uploaded training artifacts"
    );

    Ok(TrainingArtifacts {
        checkpoint_path,
        report_path,
        model_card_path,
        predictions_path,
        metadata,
        history: outcome.history,
        accuracy: outcome.evaluation.accuracy,
    })
}

fn export_error(artifact: &str, err: impl std::fmt::Display) -> RankingError {
    RankingError::Export {
        artifact: artifact.to_string(),
        reason: err.to_string(),
    }
}
