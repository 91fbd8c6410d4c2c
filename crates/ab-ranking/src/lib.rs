//! Pairwise preference ranking.
//!
//! Learns a scalar score for embeddings from human "x preferred over y"
//! judgements. A [`PairedDatasetLoader`] splits a dataset of labeled
//! embedding pairs and streams the training split through a bounded,
//! worker-filled buffer; the training loop maps pair scores to preference
//! probabilities (Elo or Bradley-Terry) and minimizes L1 loss with AdamW;
//! [`CheckpointCodec`] persists the trained scorer with a content hash.

pub mod checkpoint;
pub mod error;
pub mod inference;
pub mod model;
pub mod report;
pub mod task;
pub mod training;

pub use checkpoint::{CheckpointCodec, DecodedCheckpoint, ModelMetadata};
pub use error::{RankingError, TrainingPhase};
pub use inference::{PairPrediction, PairPredictor};
pub use model::scorer::{PairScorer, PairScorerConfig, RankingScorer, ScoreNetwork};
pub use report::{ModelCard, TrainReport};
pub use task::{run_training_task, TrainingArtifacts, TrainingTask};
pub use training::data::{
    EmbeddingPair, LoadReport, LoaderConfig, PairBatch, PairedDatasetLoader, TargetStats, TrainingBatch,
};
pub use training::metrics::{AccuracyStats, EpochMetrics, MetricsHistory};
pub use training::source::{EmbeddingSource, InMemorySource, ObjectStoreSource};
pub use training::trainer::{train, FinalEvaluation, TrainingConfig, TrainingOutcome};
pub use training::transform::ProbabilityTransform;
