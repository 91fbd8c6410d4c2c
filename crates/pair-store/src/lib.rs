//! Storage boundary for pairwise ranking datasets.
//!
//! Provides the object store capability used to fetch labeled embedding pairs
//! and publish training artifacts, the JSON wire format of a single pair, and
//! Parquet I/O for the per-pair predictions produced by a training run.

pub mod reader;
pub mod store;
pub mod types;
pub mod writer;

pub use reader::PredictionReader;
pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore, StoreError};
pub use types::{
    model_output_prefix, pairs_prefix, PairRecord, PredictionRecord, PredictionSummary, Split,
    DATASETS_BUCKET,
};
pub use writer::PredictionWriter;
