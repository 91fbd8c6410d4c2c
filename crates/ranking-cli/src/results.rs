//! Result types for training runs and prediction summaries.

use std::path::Path;

use ab_ranking::{ModelMetadata, TrainingArtifacts};
use pair_store::{PredictionRecord, PredictionSummary, Split};
use serde::{Deserialize, Serialize};

/// Outcome of one `train` invocation, optionally written as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRunResult {
    /// RFC 3339 timestamp of when the run finished.
    pub timestamp: String,
    pub dataset_name: String,
    /// Root directory of the object store the run read from and wrote to.
    pub store_root: String,
    pub checkpoint_path: String,
    pub report_path: String,
    pub model_card_path: String,
    pub predictions_path: String,
    pub model_hash: String,
    pub epochs: usize,
    /// Losses of the last recorded epoch.
    pub final_training_loss: Option<f64>,
    pub final_validation_loss: Option<f64>,
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
    pub elapsed_secs: f64,
}

impl TrainRunResult {
    pub fn from_artifacts(
        dataset_name: &str,
        store_root: &Path,
        artifacts: &TrainingArtifacts,
        elapsed_secs: f64,
    ) -> Self {
        let last = artifacts.history.last();
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            dataset_name: dataset_name.to_string(),
            store_root: store_root.display().to_string(),
            checkpoint_path: artifacts.checkpoint_path.clone(),
            report_path: artifacts.report_path.clone(),
            model_card_path: artifacts.model_card_path.clone(),
            predictions_path: artifacts.predictions_path.clone(),
            model_hash: artifacts.metadata.model_hash.clone(),
            epochs: artifacts.history.len(),
            final_training_loss: last.map(|m| m.training_loss),
            final_validation_loss: last.map(|m| m.validation_loss),
            training_accuracy: artifacts.accuracy.training_accuracy(),
            validation_accuracy: artifacts.accuracy.validation_accuracy(),
            elapsed_secs,
        }
    }

    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Distribution of predicted scores within one split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    /// Number of scores (two per pair).
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl ScoreStats {
    /// Returns `None` for an empty input.
    pub fn from_scores(mut scores: Vec<f64>) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let count = scores.len();
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = scores.iter().sum::<f64>() / count as f64;
        let median = median(&mut scores);
        Some(Self {
            count,
            min,
            max,
            mean,
            median,
        })
    }
}

/// Compute the median of a slice of f64 values.
///
/// Returns 0.0 for empty slices.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// What `summary` reports about a predictions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionFileSummary {
    pub summary: PredictionSummary,
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
    pub training_scores: Option<ScoreStats>,
    pub validation_scores: Option<ScoreStats>,
}

impl PredictionFileSummary {
    pub fn from_records(records: &[PredictionRecord]) -> Self {
        let summary = pair_store::reader::summarize(records);
        let scores = |split: Split| {
            ScoreStats::from_scores(
                records
                    .iter()
                    .filter(|r| r.split == split)
                    .flat_map(|r| [r.score_x, r.score_y])
                    .collect(),
            )
        };
        Self {
            training_accuracy: summary.training_accuracy(),
            validation_accuracy: summary.validation_accuracy(),
            training_scores: scores(Split::Training),
            validation_scores: scores(Split::Validation),
            summary,
        }
    }
}

/// What `inspect-checkpoint` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub metadata: ModelMetadata,
    pub parameter_shapes: Vec<(String, Vec<usize>)>,
    pub total_parameters: usize,
    pub model_dict_bytes: usize,
    /// Always true for a summary that was produced; decoding fails otherwise.
    pub hash_verified: bool,
}
