//! Training pipeline: embedding sources, the buffered dataset loader,
//! probability transforms, loss, metrics and the epoch loop.

pub(crate) mod buffer;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod source;
pub mod trainer;
pub mod transform;
