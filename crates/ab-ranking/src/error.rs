//! Error taxonomy for dataset loading, training and checkpointing.

use std::fmt;

use pair_store::StoreError;

/// Stage of a training run, attached to errors raised inside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Init,
    FillBuffer,
    BatchTrain,
    ValidationPass,
    MetricsRecord,
    FinalEvaluation,
    Checkpoint,
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::FillBuffer => "fill-buffer",
            Self::BatchTrain => "batch-train",
            Self::ValidationPass => "validation",
            Self::MetricsRecord => "metrics",
            Self::FinalEvaluation => "final-evaluation",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Errors raised by the ranking engine.
#[derive(Debug, thiserror::Error)]
pub enum RankingError {
    /// The embedding source could not be read, or holds no usable pairs.
    #[error("Dataset '{dataset}' unavailable: {reason}")]
    DataUnavailable { dataset: String, reason: String },

    /// A pair record failed validation. Rejected at load time, never fatal.
    #[error("Invalid pair {key}: {reason}")]
    InvalidPair { key: String, reason: String },

    /// No pair reached the training buffer within the configured timeout.
    #[error("Training buffer starved: no pair within {timeout_ms} ms, {remaining} pairs outstanding")]
    BufferStarvation { timeout_ms: u64, remaining: usize },

    /// A predicted probability fell outside [0, 1].
    #[error("Probability {value} outside [0, 1]")]
    ScoreRange { value: f64 },

    /// A parameter gradient (or the loss feeding it) contains NaN.
    #[error("NaN gradient in {parameter}")]
    NaNGradient { parameter: String },

    /// A debug-mode numerical assertion other than range or NaN failed.
    #[error("Debug assertion failed: {0}")]
    DebugAssertion(String),

    /// The checkpoint blob is missing fields, fails its hash, or does not fit the scorer.
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// Serializing a checkpoint, report or prediction export failed.
    #[error("Failed to export {artifact}: {reason}")]
    Export { artifact: String, reason: String },

    /// Training parameters rejected at initialization.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fatal error raised inside the training loop, with its position.
    #[error("{phase} failed at epoch {epoch}, batch {batch}: {source}")]
    During {
        phase: TrainingPhase,
        epoch: usize,
        batch: usize,
        #[source]
        source: Box<RankingError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RankingError {
    /// Attach the training-loop position at which this error surfaced.
    pub fn during(self, phase: TrainingPhase, epoch: usize, batch: usize) -> Self {
        Self::During {
            phase,
            epoch,
            batch,
            source: Box::new(self),
        }
    }

    /// The underlying error with any loop-position wrappers removed.
    pub fn root(&self) -> &RankingError {
        match self {
            Self::During { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn unavailable(dataset: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            dataset: dataset.to_string(),
            reason: reason.into(),
        }
    }
}
