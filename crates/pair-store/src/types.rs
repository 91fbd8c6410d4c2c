//! Data types for labeled embedding pairs and final-evaluation predictions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::StoreError;

/// Bucket holding every dataset and the models trained on it.
pub const DATASETS_BUCKET: &str = "datasets";

/// Object prefix under which a dataset's pair records live.
pub fn pairs_prefix(dataset_name: &str) -> String {
    format!("{dataset_name}/pairs/")
}

/// Object prefix under which checkpoints and reports for a dataset are written.
pub fn model_output_prefix(dataset_name: &str) -> String {
    format!("{dataset_name}/models/ranking/ab_ranking")
}

/// One labeled comparison as stored in the embedding source.
///
/// `target = 1.0` means `embedding_x` was preferred over `embedding_y`.
/// The record is not validated here; the dataset loader rejects malformed
/// records at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    /// Embedding of the first image.
    pub embedding_x: Vec<f32>,
    /// Embedding of the second image.
    pub embedding_y: Vec<f32>,
    /// Preference label: 1.0 if x is preferred, 0.0 if y is preferred.
    pub target: f32,
}

impl PairRecord {
    /// Decode a record from the JSON bytes of a stored object.
    pub fn from_json(path: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode the record as JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        // Serializing plain vectors and floats cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Which split of the dataset a prediction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Training,
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Training => write!(f, "training"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

impl Split {
    /// Parse from string. Anything other than "training" is validation.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "training" => Self::Training,
            _ => Self::Validation,
        }
    }
}

/// Scores and probability predicted for one pair during final evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Split the pair was drawn from.
    pub split: Split,
    /// Position of the pair in the evaluation order of its split.
    pub pair_index: u64,
    /// Predicted score of `embedding_x`.
    pub score_x: f64,
    /// Predicted score of `embedding_y`.
    pub score_y: f64,
    /// Predicted probability that x beats y.
    pub probability: f64,
    /// Ground-truth target (0.0 or 1.0).
    pub target: f64,
}

impl PredictionRecord {
    /// Whether the predicted scores order the pair the way the target does.
    pub fn is_correct(&self) -> bool {
        if self.target == 1.0 {
            self.score_x > self.score_y
        } else {
            self.score_x < self.score_y
        }
    }
}

/// Summary statistics for a prediction Parquet file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_records: usize,
    pub training_count: usize,
    pub validation_count: usize,
    pub training_correct: usize,
    pub validation_correct: usize,
}

impl PredictionSummary {
    /// Fraction of training pairs ordered correctly, 0.0 when empty.
    pub fn training_accuracy(&self) -> f64 {
        ratio(self.training_correct, self.training_count)
    }

    /// Fraction of validation pairs ordered correctly, 0.0 when empty.
    pub fn validation_accuracy(&self) -> f64 {
        ratio(self.validation_correct, self.validation_count)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(score_x: f64, score_y: f64, target: f64) -> PredictionRecord {
        PredictionRecord {
            split: Split::Training,
            pair_index: 0,
            score_x,
            score_y,
            probability: 0.5,
            target,
        }
    }

    #[test]
    fn test_pair_record_json() {
        let record = PairRecord {
            embedding_x: vec![0.1, 0.2],
            embedding_y: vec![0.3, 0.4],
            target: 1.0,
        };
        let bytes = record.to_json();
        let decoded = PairRecord::from_json("a.json", &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_pair_record_malformed_json() {
        let err = PairRecord::from_json("bad.json", b"{\"embedding_x\": [1.0]}").unwrap_err();
        match err {
            StoreError::Decode { path, .. } => assert_eq!(path, "bad.json"),
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn test_prediction_correctness() {
        assert!(prediction(2.0, 1.0, 1.0).is_correct());
        assert!(!prediction(1.0, 2.0, 1.0).is_correct());
        assert!(prediction(1.0, 2.0, 0.0).is_correct());
        // Ties are never a correct ordering.
        assert!(!prediction(1.0, 1.0, 1.0).is_correct());
        assert!(!prediction(1.0, 1.0, 0.0).is_correct());
    }

    #[test]
    fn test_split_display_roundtrip() {
        assert_eq!(Split::from_str_lossy(&Split::Training.to_string()), Split::Training);
        assert_eq!(Split::from_str_lossy(&Split::Validation.to_string()), Split::Validation);
    }

    #[test]
    fn test_layout_paths() {
        assert_eq!(pairs_prefix("environmental"), "environmental/pairs/");
        assert_eq!(
            model_output_prefix("environmental"),
            "environmental/models/ranking/ab_ranking"
        );
    }

    #[test]
    fn test_summary_accuracy_empty() {
        let summary = PredictionSummary::default();
        assert_eq!(summary.training_accuracy(), 0.0);
        assert_eq!(summary.validation_accuracy(), 0.0);
    }
}
