//! Per-epoch loss records and final ordering accuracy.

use pair_store::reader::summarize;
use pair_store::{PredictionRecord, PredictionSummary};
use serde::{Deserialize, Serialize};

/// Losses recorded at the end of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean batch loss. Equals `validation_loss` for epoch 0, which does not train.
    pub training_loss: f64,
    /// Mean per-pair validation loss.
    pub validation_loss: f64,
}

/// Ordered per-epoch metrics of a training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    epochs: Vec<EpochMetrics>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn training_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.training_loss).collect()
    }

    pub fn validation_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.validation_loss).collect()
    }
}

/// Correct-ordering counts for both splits after training.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub training_correct: usize,
    pub training_total: usize,
    pub validation_correct: usize,
    pub validation_total: usize,
}

impl AccuracyStats {
    /// Count pairs whose predicted scores order them the way their target does.
    pub fn from_predictions(predictions: &[PredictionRecord]) -> Self {
        summarize(predictions).into()
    }

    pub fn training_accuracy(&self) -> f64 {
        ratio(self.training_correct, self.training_total)
    }

    pub fn validation_accuracy(&self) -> f64 {
        ratio(self.validation_correct, self.validation_total)
    }
}

impl From<PredictionSummary> for AccuracyStats {
    fn from(summary: PredictionSummary) -> Self {
        Self {
            training_correct: summary.training_correct,
            training_total: summary.training_count,
            validation_correct: summary.validation_correct,
            validation_total: summary.validation_count,
        }
    }
}

/// Arithmetic mean, NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
