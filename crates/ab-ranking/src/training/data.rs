//! Paired dataset loading and the double-buffered training feed.
//!
//! `PairedDatasetLoader` lists a dataset's pair records, shuffles them once
//! into a training pool and a validation split, and then serves the training
//! pool epoch by epoch through a bounded queue filled by worker threads.
//!
//! Per-epoch protocol used by the training loop:
//!
//! ```text
//! load_dataset()                      // split, validate, prefill epoch 1
//! loop {
//!     spawn_filling_workers()         // producers for the rest of the epoch
//!     next_training_feature_vectors_and_target(n)  // until exhausted
//!     fill_training_data()            // barrier, reshuffle, prefill next epoch
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use pair_store::{PairRecord, StoreError};

use crate::error::RankingError;
use crate::model::bridge::{embeddings_to_tensor, targets_to_tensor};
use crate::training::buffer::EpochBuffer;
use crate::training::source::EmbeddingSource;

/// One validated labeled comparison. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingPair {
    embedding_x: Vec<f32>,
    embedding_y: Vec<f32>,
    target: f32,
}

impl EmbeddingPair {
    /// Validate and build a pair.
    ///
    /// Both embeddings must share a non-zero length (equal to `expected_dim`
    /// when given), hold only finite values, and `target` must be exactly
    /// 0.0 or 1.0.
    pub fn new(
        embedding_x: Vec<f32>,
        embedding_y: Vec<f32>,
        target: f32,
        expected_dim: Option<usize>,
    ) -> Result<Self, String> {
        if embedding_x.is_empty() {
            return Err("empty embedding".to_string());
        }
        if embedding_x.len() != embedding_y.len() {
            return Err(format!(
                "embedding lengths differ: x has {}, y has {}",
                embedding_x.len(),
                embedding_y.len()
            ));
        }
        if let Some(dim) = expected_dim {
            if embedding_x.len() != dim {
                return Err(format!("embedding dimension {} != {dim}", embedding_x.len()));
            }
        }
        if target != 0.0 && target != 1.0 {
            return Err(format!("target {target} is not 0.0 or 1.0"));
        }
        if embedding_x.iter().chain(&embedding_y).any(|v| !v.is_finite()) {
            return Err("embedding contains non-finite values".to_string());
        }
        Ok(Self {
            embedding_x,
            embedding_y,
            target,
        })
    }

    pub fn embedding_x(&self) -> &[f32] {
        &self.embedding_x
    }

    pub fn embedding_y(&self) -> &[f32] {
        &self.embedding_y
    }

    /// 1.0 if x is preferred, 0.0 if y is preferred.
    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn dim(&self) -> usize {
        self.embedding_x.len()
    }
}

/// Aligned batch of pairs: row `i` of x, y and targets describe the same pair.
#[derive(Debug, Clone, Default)]
pub struct PairBatch {
    pairs: Vec<Arc<EmbeddingPair>>,
}

impl PairBatch {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[Arc<EmbeddingPair>] {
        &self.pairs
    }

    /// Copy out `(x_batch, y_batch, target_batch)`.
    pub fn arrays(&self) -> (Vec<Vec<f32>>, Vec<Vec<f32>>, Vec<f32>) {
        let xs = self.pairs.iter().map(|p| p.embedding_x.clone()).collect();
        let ys = self.pairs.iter().map(|p| p.embedding_y.clone()).collect();
        (xs, ys, self.targets())
    }

    pub fn targets(&self) -> Vec<f32> {
        self.pairs.iter().map(|p| p.target).collect()
    }

    /// `(x, y, targets)` tensors of shapes `(n, dim)`, `(n, dim)`, `(n,)`.
    ///
    /// # Panics
    /// Panics on an empty batch.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 2>, Tensor<B, 2>, Tensor<B, 1>) {
        let xs: Vec<&[f32]> = self.pairs.iter().map(|p| p.embedding_x()).collect();
        let ys: Vec<&[f32]> = self.pairs.iter().map(|p| p.embedding_y()).collect();
        (
            embeddings_to_tensor(&xs, device),
            embeddings_to_tensor(&ys, device),
            targets_to_tensor(&self.targets(), device),
        )
    }
}

impl From<Vec<Arc<EmbeddingPair>>> for PairBatch {
    fn from(pairs: Vec<Arc<EmbeddingPair>>) -> Self {
        Self { pairs }
    }
}

/// A batch popped from the training buffer.
#[derive(Debug, Clone)]
pub struct TrainingBatch {
    pub pairs: PairBatch,
    /// True once every pair of the current epoch has been delivered.
    pub epoch_exhausted: bool,
}

/// Distribution of targets across every valid pair of the dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStats {
    /// Pairs with target 1.0 (first image selected).
    pub selected_index_0: usize,
    /// Pairs with target 0.0 (second image selected).
    pub selected_index_1: usize,
    pub total: usize,
}

impl TargetStats {
    fn record(&mut self, target: f32) {
        if target == 1.0 {
            self.selected_index_0 += 1;
        } else {
            self.selected_index_1 += 1;
        }
        self.total += 1;
    }
}

/// Outcome of [`PairedDatasetLoader::load_dataset`].
#[derive(Debug)]
pub struct LoadReport {
    pub training_pairs: usize,
    pub validation_pairs: usize,
    pub embedding_dim: usize,
    pub target_stats: TargetStats,
    /// Records rejected during validation, each an [`RankingError::InvalidPair`].
    pub rejected: Vec<RankingError>,
}

/// Loader configuration.
#[derive(Config, Debug)]
pub struct LoaderConfig {
    /// Capacity of the training queue, in pairs.
    #[config(default = 20_000)]
    pub buffer_size: usize,
    /// Fraction of listed pairs assigned to the training pool.
    #[config(default = 0.9)]
    pub train_percent: f64,
    /// Producer threads per epoch.
    #[config(default = 2)]
    pub num_workers: usize,
    /// Longest the consumer waits for a single pair.
    #[config(default = 30_000)]
    pub starvation_timeout_ms: u64,
    /// Cache decoded training pairs in memory instead of re-reading them every epoch.
    #[config(default = false)]
    pub load_to_ram: bool,
    /// Seed for the split and epoch shuffles. Entropy when unset.
    pub seed: Option<u64>,
    /// Required embedding dimension. Taken from the first well-formed record when unset.
    pub embedding_dim: Option<usize>,
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), RankingError> {
        if self.buffer_size == 0 {
            return Err(RankingError::InvalidConfig("buffer_size must be > 0".into()));
        }
        if !(self.train_percent > 0.0 && self.train_percent <= 1.0) {
            return Err(RankingError::InvalidConfig(format!(
                "train_percent must be in (0, 1], got {}",
                self.train_percent
            )));
        }
        if self.num_workers == 0 {
            return Err(RankingError::InvalidConfig("num_workers must be > 0".into()));
        }
        if self.starvation_timeout_ms == 0 {
            return Err(RankingError::InvalidConfig("starvation_timeout_ms must be > 0".into()));
        }
        if self.embedding_dim == Some(0) {
            return Err(RankingError::InvalidConfig("embedding_dim must be > 0".into()));
        }
        Ok(())
    }
}

/// The training split: record keys plus, in load-to-RAM mode, decoded pairs.
///
/// Shared read-only with the fill workers.
pub(crate) struct TrainingPool {
    dataset_name: String,
    keys: Vec<String>,
    cache: Option<Vec<Arc<EmbeddingPair>>>,
    source: Arc<dyn EmbeddingSource>,
    dim: usize,
}

impl TrainingPool {
    pub(crate) fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// Fetch the pair at pool position `index`.
    ///
    /// Every key validated at load time, so a failure here means the source
    /// changed or became unreachable mid-run, which is fatal.
    pub(crate) fn fetch(&self, index: usize) -> Result<Arc<EmbeddingPair>, RankingError> {
        if let Some(cache) = &self.cache {
            return cache.get(index).cloned().ok_or_else(|| {
                RankingError::unavailable(&self.dataset_name, format!("pool index {index} out of range"))
            });
        }
        let key = self.keys.get(index).ok_or_else(|| {
            RankingError::unavailable(&self.dataset_name, format!("pool index {index} out of range"))
        })?;
        let record = self
            .source
            .read_pair(&self.dataset_name, key)
            .map_err(|e| RankingError::unavailable(&self.dataset_name, format!("{key}: {e}")))?;
        EmbeddingPair::new(record.embedding_x, record.embedding_y, record.target, Some(self.dim))
            .map(Arc::new)
            .map_err(|reason| {
                RankingError::unavailable(&self.dataset_name, format!("{key} changed since load: {reason}"))
            })
    }
}

/// Splits a dataset into training and validation pairs and feeds training
/// batches through a bounded, worker-filled queue.
pub struct PairedDatasetLoader {
    dataset_name: String,
    source: Arc<dyn EmbeddingSource>,
    config: LoaderConfig,
    rng: StdRng,
    pool: Option<Arc<TrainingPool>>,
    validation: PairBatch,
    target_stats: TargetStats,
    buffer: Option<EpochBuffer>,
}

impl PairedDatasetLoader {
    pub fn new(
        dataset_name: impl Into<String>,
        source: Arc<dyn EmbeddingSource>,
        config: LoaderConfig,
    ) -> Result<Self, RankingError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            dataset_name: dataset_name.into(),
            source,
            config,
            rng,
            pool: None,
            validation: PairBatch::default(),
            target_stats: TargetStats::default(),
            buffer: None,
        })
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of pairs in the training pool (one epoch's worth).
    pub fn training_len(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.len())
    }

    pub fn validation_len(&self) -> usize {
        self.validation.len()
    }

    /// Embedding dimension shared by every loaded pair, 0 before loading.
    pub fn embedding_dim(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.dim)
    }

    pub fn target_stats(&self) -> TargetStats {
        self.target_stats
    }

    /// List, shuffle and split the dataset, validate every record, and
    /// prefill the buffer for the first epoch.
    ///
    /// Invalid records are skipped and listed in the report. Fails with
    /// [`RankingError::DataUnavailable`] when the source cannot be read or
    /// no valid training pair remains.
    pub fn load_dataset(&mut self) -> Result<LoadReport, RankingError> {
        self.buffer = None;
        self.pool = None;

        let mut keys = self
            .source
            .list_pairs(&self.dataset_name)
            .map_err(|e| RankingError::unavailable(&self.dataset_name, e.to_string()))?;
        if keys.is_empty() {
            return Err(RankingError::unavailable(&self.dataset_name, "no pair records found"));
        }

        keys.shuffle(&mut self.rng);
        let training_count = ((keys.len() as f64) * self.config.train_percent).floor() as usize;
        let validation_keys = keys.split_off(training_count.min(keys.len()));
        let training_keys = keys;

        tracing::info!(
            dataset = %self.dataset_name,
            listed = training_keys.len() + validation_keys.len(),
            train_percent = self.config.train_percent,
            load_to_ram = self.config.load_to_ram,
            "Loading paired dataset"
        );

        let pb = ProgressBar::new((training_keys.len() + validation_keys.len()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) Validating pairs")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut dim = self.config.embedding_dim;
        let mut stats = TargetStats::default();
        let mut rejected = Vec::new();

        let mut validation = Vec::with_capacity(validation_keys.len());
        for key in &validation_keys {
            if let Some(pair) = self.read_valid(key, &mut dim, &mut rejected)? {
                stats.record(pair.target);
                validation.push(Arc::new(pair));
            }
            pb.inc(1);
        }

        let mut kept_keys = Vec::with_capacity(training_keys.len());
        let mut cache = self.config.load_to_ram.then(|| Vec::with_capacity(training_keys.len()));
        for key in training_keys {
            if let Some(pair) = self.read_valid(&key, &mut dim, &mut rejected)? {
                stats.record(pair.target);
                if let Some(cache) = cache.as_mut() {
                    cache.push(Arc::new(pair));
                }
                kept_keys.push(key);
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        for err in &rejected {
            tracing::warn!(dataset = %self.dataset_name, "Rejected pair: {err}");
        }
        let (Some(dim), false) = (dim, kept_keys.is_empty()) else {
            return Err(RankingError::unavailable(
                &self.dataset_name,
                format!("no valid training pairs ({} rejected)", rejected.len()),
            ));
        };
        if validation.is_empty() {
            tracing::warn!(dataset = %self.dataset_name, "Validation split is empty");
        }

        self.pool = Some(Arc::new(TrainingPool {
            dataset_name: self.dataset_name.clone(),
            keys: kept_keys,
            cache,
            source: Arc::clone(&self.source),
            dim,
        }));
        self.validation = PairBatch { pairs: validation };
        self.target_stats = stats;

        let report = LoadReport {
            training_pairs: self.training_len(),
            validation_pairs: self.validation.len(),
            embedding_dim: dim,
            target_stats: stats,
            rejected,
        };
        tracing::info!(
            training = report.training_pairs,
            validation = report.validation_pairs,
            rejected = report.rejected.len(),
            dim,
            selected_index_0 = stats.selected_index_0,
            selected_index_1 = stats.selected_index_1,
            "Dataset loaded"
        );

        self.fill_training_data()?;
        Ok(report)
    }

    /// Read one record and validate it. Malformed records land in `rejected`;
    /// source failures abort the load.
    fn read_valid(
        &self,
        key: &str,
        dim: &mut Option<usize>,
        rejected: &mut Vec<RankingError>,
    ) -> Result<Option<EmbeddingPair>, RankingError> {
        let record = match self.source.read_pair(&self.dataset_name, key) {
            Ok(record) => record,
            Err(StoreError::Decode { reason, .. }) => {
                rejected.push(RankingError::InvalidPair {
                    key: key.to_string(),
                    reason,
                });
                return Ok(None);
            }
            Err(e) => return Err(RankingError::unavailable(&self.dataset_name, format!("{key}: {e}"))),
        };

        let PairRecord {
            embedding_x,
            embedding_y,
            target,
        } = record;
        match EmbeddingPair::new(embedding_x, embedding_y, target, *dim) {
            Ok(pair) => {
                dim.get_or_insert(pair.dim());
                Ok(Some(pair))
            }
            Err(reason) => {
                rejected.push(RankingError::InvalidPair {
                    key: key.to_string(),
                    reason,
                });
                Ok(None)
            }
        }
    }

    fn loaded_pool(&self) -> Result<Arc<TrainingPool>, RankingError> {
        self.pool
            .clone()
            .ok_or_else(|| RankingError::unavailable(&self.dataset_name, "dataset not loaded"))
    }

    /// Start a fresh epoch over the training pool in a new random order.
    fn start_epoch(&mut self, pool: &TrainingPool) -> EpochBuffer {
        let mut order: Vec<usize> = (0..pool.len()).collect();
        order.shuffle(&mut self.rng);
        EpochBuffer::new(order, self.config.buffer_size)
    }

    /// Launch producer threads for the rest of the current epoch.
    ///
    /// Begins a new epoch first when none is pending (no prefill happened, or
    /// the previous one was fully consumed).
    pub fn spawn_filling_workers(&mut self) -> Result<(), RankingError> {
        let pool = self.loaded_pool()?;
        let needs_epoch = match &self.buffer {
            None => true,
            Some(buffer) if buffer.is_exhausted() => true,
            Some(buffer) if buffer.is_started() => {
                tracing::debug!(dataset = %self.dataset_name, "Fill workers already running");
                return Ok(());
            }
            Some(_) => false,
        };
        if needs_epoch {
            if let Some(mut old) = self.buffer.take() {
                old.join_workers(&self.dataset_name)?;
            }
            self.buffer = Some(self.start_epoch(&pool));
        }

        let num_workers = self.config.num_workers;
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let spawned = buffer.spawn_workers(pool, num_workers)?;
        tracing::debug!(
            dataset = %self.dataset_name,
            workers = spawned,
            remaining = buffer.remaining(),
            "Spawned buffer fill workers"
        );
        Ok(())
    }

    /// Pop up to `n` pairs from the training buffer.
    ///
    /// Returns `min(n, remaining)` pairs; `epoch_exhausted` is set once the
    /// epoch has been fully delivered. Blocks while producers catch up, and
    /// fails with [`RankingError::BufferStarvation`] if a single pair takes
    /// longer than the configured timeout.
    pub fn next_training_feature_vectors_and_target(
        &mut self,
        n: usize,
    ) -> Result<TrainingBatch, RankingError> {
        let timeout = Duration::from_millis(self.config.starvation_timeout_ms);
        let dataset = self.dataset_name.clone();
        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| RankingError::unavailable(&dataset, "training buffer not filled"))?;

        let take = n.min(buffer.remaining());
        let mut pairs = Vec::with_capacity(take);
        for _ in 0..take {
            pairs.push(buffer.pop(timeout, &dataset)?);
        }
        Ok(TrainingBatch {
            pairs: PairBatch { pairs },
            epoch_exhausted: buffer.is_exhausted(),
        })
    }

    /// Wait for the current epoch's producers to finish.
    pub fn wait_for_workers(&mut self) -> Result<(), RankingError> {
        match self.buffer.as_mut() {
            Some(buffer) if buffer.has_workers() => buffer.join_workers(&self.dataset_name),
            _ => Ok(()),
        }
    }

    /// Epoch barrier: join producers, reshuffle the pool, and synchronously
    /// prefill the buffer for the next epoch with up to `buffer_size` pairs.
    pub fn fill_training_data(&mut self) -> Result<(), RankingError> {
        let pool = self.loaded_pool()?;
        if let Some(mut old) = self.buffer.take() {
            if !old.is_exhausted() {
                tracing::warn!(
                    dataset = %self.dataset_name,
                    undelivered = old.remaining(),
                    "Discarding undelivered pairs at epoch barrier"
                );
            }
            old.join_workers(&self.dataset_name)?;
        }

        let mut buffer = self.start_epoch(&pool);
        let prefilled = buffer.prefill(&pool, self.config.buffer_size)?;
        tracing::debug!(dataset = %self.dataset_name, prefilled, "Prefilled training buffer");
        self.buffer = Some(buffer);
        Ok(())
    }

    /// The validation split. Identical on every call.
    pub fn validation_feature_vectors_and_target(&self) -> &PairBatch {
        &self.validation
    }
}
