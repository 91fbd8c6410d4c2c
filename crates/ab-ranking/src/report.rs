//! Plain-text training report and JSON model card.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use pair_store::Split;

use crate::checkpoint::ModelMetadata;
use crate::training::data::TargetStats;
use crate::training::metrics::MetricsHistory;
use crate::training::trainer::{FinalEvaluation, TrainingConfig};

pub const INPUT_TYPE: &str = "embedding-vector";
pub const OUTPUT_TYPE: &str = "score";

/// Everything the report and model card describe about a finished run.
pub struct TrainReport<'a> {
    pub metadata: &'a ModelMetadata,
    /// `{bucket}/{dataset}` the pairs were read from.
    pub dataset_path: String,
    pub train_percent: f64,
    pub training_size: usize,
    pub validation_size: usize,
    pub rejected: usize,
    pub config: &'a TrainingConfig,
    pub history: &'a MetricsHistory,
    pub evaluation: &'a FinalEvaluation,
    pub target_stats: TargetStats,
    pub parameter_shapes: &'a [(String, Vec<usize>)],
}

/// Min, max and mean of a set of scores.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreRange {
    min: f64,
    max: f64,
    mean: f64,
}

fn score_range(scores: impl Iterator<Item = f64>) -> Option<ScoreRange> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for s in scores {
        count += 1;
        sum += s;
        min = min.min(s);
        max = max.max(s);
    }
    (count > 0).then(|| ScoreRange {
        min,
        max,
        mean: sum / count as f64,
    })
}

impl TrainReport<'_> {
    fn split_scores(&self, split: Split) -> Option<ScoreRange> {
        score_range(
            self.evaluation
                .split(split)
                .flat_map(|p| [p.score_x, p.score_y]),
        )
    }

    /// Render the human-readable report.
    pub fn render_text(&self) -> String {
        let accuracy = &self.evaluation.accuracy;
        let mut out = String::new();

        // Writing into a String cannot fail.
        let _ = writeln!(out, "model_type: {}", self.metadata.model_type);
        let _ = writeln!(out, "model_path: {}", self.metadata.file_path);
        let _ = writeln!(out, "model_hash: {}", self.metadata.model_hash);
        let _ = writeln!(out, "date: {}", self.metadata.date);
        let _ = writeln!(out, "dataset: {}", self.dataset_path);
        let _ = writeln!(out, "input_type: {INPUT_TYPE}");
        let _ = writeln!(out, "output_type: {OUTPUT_TYPE}");
        let _ = writeln!(out);

        let _ = writeln!(out, "train_percent: {}", self.train_percent);
        let _ = writeln!(out, "training_size: {}", self.training_size);
        let _ = writeln!(out, "validation_size: {}", self.validation_size);
        let _ = writeln!(out, "rejected_pairs: {}", self.rejected);
        let _ = writeln!(
            out,
            "selected_index_0: {}  selected_index_1: {}  total: {}",
            self.target_stats.selected_index_0, self.target_stats.selected_index_1, self.target_stats.total
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "epochs: {}", self.config.epochs);
        let _ = writeln!(out, "training_batch_size: {}", self.config.batch_size);
        let _ = writeln!(out, "learning_rate: {}", self.config.learning_rate);
        let _ = writeln!(out, "weight_decay: {}", self.config.weight_decay);
        let _ = writeln!(out, "transform: {}", self.config.transform);
        let _ = writeln!(out, "loss: l1");
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "training_correct: {}/{} ({:.2}%)",
            accuracy.training_correct,
            accuracy.training_total,
            accuracy.training_accuracy() * 100.0
        );
        let _ = writeln!(
            out,
            "validation_correct: {}/{} ({:.2}%)",
            accuracy.validation_correct,
            accuracy.validation_total,
            accuracy.validation_accuracy() * 100.0
        );
        for (label, split) in [("training", Split::Training), ("validation", Split::Validation)] {
            if let Some(r) = self.split_scores(split) {
                let _ = writeln!(
                    out,
                    "{label}_scores: min={:.4} max={:.4} mean={:.4}",
                    r.min, r.max, r.mean
                );
            }
        }
        let _ = writeln!(out);

        let total_params: usize = self
            .parameter_shapes
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum();
        let _ = writeln!(out, "parameters: {total_params}");
        for (name, shape) in self.parameter_shapes {
            let _ = writeln!(out, "  {name}: {shape:?}");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "epoch  training_loss  validation_loss");
        for m in self.history.epochs() {
            let _ = writeln!(out, "{:>5}  {:>13.6}  {:>15.6}", m.epoch, m.training_loss, m.validation_loss);
        }
        out
    }

    /// Build the model card, pointing at the exported predictions.
    pub fn model_card(&self, predictions_path: &str) -> ModelCard {
        let last = self.history.last();
        ModelCard {
            model_creation_date: self.metadata.date.clone(),
            model_type: self.metadata.model_type.clone(),
            model_path: self.metadata.file_path.clone(),
            model_file_hash: self.metadata.model_hash.clone(),
            input_type: INPUT_TYPE.to_string(),
            output_type: OUTPUT_TYPE.to_string(),
            number_of_training_points: self.training_size,
            number_of_validation_points: self.validation_size,
            training_loss: last.map(|m| m.training_loss),
            validation_loss: last.map(|m| m.validation_loss),
            training_accuracy: self.evaluation.accuracy.training_accuracy(),
            validation_accuracy: self.evaluation.accuracy.validation_accuracy(),
            predictions_path: predictions_path.to_string(),
        }
    }
}

/// Machine-readable summary uploaded next to each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCard {
    pub model_creation_date: String,
    pub model_type: String,
    pub model_path: String,
    pub model_file_hash: String,
    pub input_type: String,
    pub output_type: String,
    pub number_of_training_points: usize,
    pub number_of_validation_points: usize,
    pub training_loss: Option<f64>,
    pub validation_loss: Option<f64>,
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
    pub predictions_path: String,
}

impl ModelCard {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}
