//! Integration tests for the ranking crate.
//!
//! These exercise the loader, training loop and checkpoint codec together:
//! epoch batching through the fill buffer, starvation and mid-epoch source
//! failures, loss reduction on a separable dataset, and the end-to-end task
//! that publishes artifacts to an object store. All use the NdArray backend
//! and synthetic embeddings.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module, Param};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use ab_ranking::{
    run_training_task, train, CheckpointCodec, EmbeddingSource, InMemorySource, LoaderConfig,
    PairPredictor, PairScorer, PairScorerConfig, PairedDatasetLoader, ProbabilityTransform,
    RankingError, RankingScorer, ScoreNetwork, TrainingConfig, TrainingPhase, TrainingTask,
};
use pair_store::{
    pairs_prefix, LocalObjectStore, MemoryObjectStore, ObjectStore, PairRecord, PredictionReader,
    StoreError, DATASETS_BUCKET,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

const DIM: usize = 4;

/// Pair `i` has `embedding_x[0] == i`, so deliveries can be traced back.
fn indexed_pairs(n: usize) -> Vec<PairRecord> {
    (0..n)
        .map(|i| PairRecord {
            embedding_x: vec![i as f32, 0.5, -0.5, 1.0],
            embedding_y: vec![-(i as f32), 0.25, 0.75, -1.0],
            target: (i % 2) as f32,
        })
        .collect()
}

/// Pairs whose preference is decided by the first embedding component.
fn separable_pairs(n: usize, seed: u64) -> Vec<PairRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-3.0..3.0)).collect();
            let y: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-3.0..3.0)).collect();
            let target = if x[0] > y[0] { 1.0 } else { 0.0 };
            PairRecord {
                embedding_x: x,
                embedding_y: y,
                target,
            }
        })
        .collect()
}

fn memory_loader(pairs: Vec<PairRecord>, config: LoaderConfig) -> PairedDatasetLoader {
    let source = Arc::new(InMemorySource::with_dataset("synthetic", pairs));
    PairedDatasetLoader::new("synthetic", source, config).unwrap()
}

fn small_scorer<B: Backend>(device: &B::Device) -> PairScorer<B> {
    PairScorerConfig::new(DIM)
        .with_hidden1(16)
        .with_hidden2(8)
        .with_dropout(0.0)
        .init::<B>(device)
}

fn seed_store(store: &dyn ObjectStore, dataset: &str, pairs: &[PairRecord]) {
    for (i, pair) in pairs.iter().enumerate() {
        let path = format!("{}{i:04}.json", pairs_prefix(dataset));
        store.put(DATASETS_BUCKET, &path, &pair.to_json()).unwrap();
    }
}

/// Source that starts failing every read once `fail` is set.
struct FlakySource {
    inner: InMemorySource,
    fail: AtomicBool,
}

impl EmbeddingSource for FlakySource {
    fn list_pairs(&self, dataset_name: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list_pairs(dataset_name)
    }

    fn read_pair(&self, dataset_name: &str, key: &str) -> Result<PairRecord, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("connection reset")));
        }
        self.inner.read_pair(dataset_name, key)
    }
}

// ---------------------------------------------------------------------------
// Loader + fill buffer
// ---------------------------------------------------------------------------

#[test]
fn test_epoch_batches_cover_pool_once_per_epoch() {
    // 12 listed pairs at 85% -> 10 training (floor), 2 validation
    let config = LoaderConfig::new()
        .with_buffer_size(4)
        .with_train_percent(0.85)
        .with_seed(Some(11))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(indexed_pairs(12), config);
    let report = loader.load_dataset().unwrap();
    assert_eq!(report.training_pairs, 10);
    assert_eq!(report.validation_pairs, 2);
    assert_eq!(report.embedding_dim, DIM);
    assert!(report.rejected.is_empty());

    let validation_ids: BTreeSet<i64> = loader
        .validation_feature_vectors_and_target()
        .pairs()
        .iter()
        .map(|p| p.embedding_x()[0] as i64)
        .collect();

    let mut previous: Option<BTreeSet<i64>> = None;
    for _epoch in 0..3 {
        loader.spawn_filling_workers().unwrap();
        let mut seen = Vec::new();
        let mut sizes = Vec::new();
        let mut exhausted = Vec::new();
        for want in [4, 4, 4] {
            let batch = loader.next_training_feature_vectors_and_target(want).unwrap();
            sizes.push(batch.pairs.len());
            exhausted.push(batch.epoch_exhausted);
            seen.extend(batch.pairs.pairs().iter().map(|p| p.embedding_x()[0] as i64));
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(exhausted, vec![false, false, true]);

        let ids: BTreeSet<i64> = seen.iter().copied().collect();
        assert_eq!(ids.len(), 10, "each training pair delivered exactly once");
        assert!(ids.is_disjoint(&validation_ids));
        if let Some(prev) = &previous {
            assert_eq!(prev, &ids);
        }
        previous = Some(ids);

        // Requests past exhaustion return nothing
        let empty = loader.next_training_feature_vectors_and_target(4).unwrap();
        assert!(empty.pairs.is_empty());
        assert!(empty.epoch_exhausted);

        loader.fill_training_data().unwrap();
    }

    // Validation split never changes
    let again: BTreeSet<i64> = loader
        .validation_feature_vectors_and_target()
        .pairs()
        .iter()
        .map(|p| p.embedding_x()[0] as i64)
        .collect();
    assert_eq!(again, validation_ids);
}

#[test]
fn test_buffer_starvation_without_producers() {
    let config = LoaderConfig::new()
        .with_buffer_size(3)
        .with_train_percent(1.0)
        .with_seed(Some(3))
        .with_starvation_timeout_ms(50);
    let mut loader = memory_loader(indexed_pairs(10), config);
    loader.load_dataset().unwrap();

    // Only the prefilled pairs are available; no workers were spawned.
    match loader.next_training_feature_vectors_and_target(5) {
        Err(RankingError::BufferStarvation { timeout_ms, remaining }) => {
            assert_eq!(timeout_ms, 50);
            assert_eq!(remaining, 7);
        }
        other => panic!("expected BufferStarvation, got {other:?}"),
    }
}

#[test]
fn test_source_failure_mid_epoch_is_fatal() {
    let source = Arc::new(FlakySource {
        inner: InMemorySource::with_dataset("flaky", indexed_pairs(8)),
        fail: AtomicBool::new(false),
    });
    let config = LoaderConfig::new()
        .with_buffer_size(2)
        .with_train_percent(1.0)
        .with_seed(Some(5))
        .with_starvation_timeout_ms(5_000);
    let mut loader = PairedDatasetLoader::new("flaky", source.clone(), config).unwrap();
    loader.load_dataset().unwrap();

    source.fail.store(true, Ordering::SeqCst);
    loader.spawn_filling_workers().unwrap();

    let err = loader.next_training_feature_vectors_and_target(8).unwrap_err();
    match err.root() {
        RankingError::DataUnavailable { dataset, reason } => {
            assert_eq!(dataset, "flaky");
            assert!(reason.contains("connection reset"), "{reason}");
        }
        other => panic!("expected DataUnavailable, got {other:?}"),
    }
}

#[test]
fn test_load_to_ram_survives_source_outage() {
    let source = Arc::new(FlakySource {
        inner: InMemorySource::with_dataset("cached", indexed_pairs(8)),
        fail: AtomicBool::new(false),
    });
    let config = LoaderConfig::new()
        .with_buffer_size(2)
        .with_train_percent(1.0)
        .with_load_to_ram(true)
        .with_seed(Some(5))
        .with_starvation_timeout_ms(5_000);
    let mut loader = PairedDatasetLoader::new("cached", source.clone(), config).unwrap();
    loader.load_dataset().unwrap();

    source.fail.store(true, Ordering::SeqCst);
    for _ in 0..2 {
        loader.spawn_filling_workers().unwrap();
        let batch = loader.next_training_feature_vectors_and_target(8).unwrap();
        assert_eq!(batch.pairs.len(), 8);
        assert!(batch.epoch_exhausted);
        loader.fill_training_data().unwrap();
    }
}

#[test]
fn test_malformed_records_are_rejected() {
    let store = MemoryObjectStore::new();
    seed_store(&store, "mixed", &indexed_pairs(6));
    let prefix = pairs_prefix("mixed");
    store
        .put(DATASETS_BUCKET, &format!("{prefix}bad-json.json"), b"{not json")
        .unwrap();
    let short = PairRecord {
        embedding_x: vec![1.0, 2.0],
        embedding_y: vec![3.0, 4.0],
        target: 1.0,
    };
    store
        .put(DATASETS_BUCKET, &format!("{prefix}short.json"), &short.to_json())
        .unwrap();
    let bad_target = PairRecord {
        embedding_x: vec![0.0; DIM],
        embedding_y: vec![1.0; DIM],
        target: 0.5,
    };
    store
        .put(DATASETS_BUCKET, &format!("{prefix}bad-target.json"), &bad_target.to_json())
        .unwrap();

    let source = Arc::new(ab_ranking::ObjectStoreSource::new(store));
    let config = LoaderConfig::new()
        .with_train_percent(1.0)
        .with_seed(Some(1))
        .with_embedding_dim(Some(DIM));
    let mut loader = PairedDatasetLoader::new("mixed", source, config).unwrap();
    let report = loader.load_dataset().unwrap();

    assert_eq!(report.training_pairs, 6);
    assert_eq!(report.rejected.len(), 3);
    assert!(report
        .rejected
        .iter()
        .all(|e| matches!(e, RankingError::InvalidPair { .. })));
    assert_eq!(report.target_stats.total, 6);
    assert_eq!(report.target_stats.selected_index_0, 3);
}

#[test]
fn test_empty_dataset_is_unavailable() {
    let store = MemoryObjectStore::new();
    let source = Arc::new(ab_ranking::ObjectStoreSource::new(store));
    let mut loader = PairedDatasetLoader::new("nothing", source, LoaderConfig::new()).unwrap();
    assert!(matches!(
        loader.load_dataset(),
        Err(RankingError::DataUnavailable { .. })
    ));
}

// ---------------------------------------------------------------------------
// Training loop
// ---------------------------------------------------------------------------

#[test]
fn test_epoch_zero_measures_untrained_model() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(8)
        .with_train_percent(0.8)
        .with_seed(Some(21))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(separable_pairs(20, 1), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);

    let training = TrainingConfig::new().with_epochs(3).with_batch_size(4);
    let outcome = train(&training, model, &mut loader, &device).unwrap();

    let epochs = outcome.history.epochs();
    assert_eq!(epochs.len(), 3);
    assert_eq!(epochs[0].epoch, 0);
    assert_eq!(epochs[0].training_loss, epochs[0].validation_loss);
    for m in epochs {
        assert!(m.training_loss.is_finite());
        assert!((0.0..=1.0).contains(&m.validation_loss));
    }

    let accuracy = &outcome.evaluation.accuracy;
    assert_eq!(accuracy.training_total, 16);
    assert_eq!(accuracy.validation_total, 4);
    assert_eq!(outcome.evaluation.predictions.len(), 20);
}

#[test]
fn test_training_reduces_validation_loss() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(32)
        .with_train_percent(0.8)
        .with_seed(Some(42))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(separable_pairs(120, 7), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);

    let training = TrainingConfig::new()
        .with_epochs(12)
        .with_batch_size(8)
        .with_learning_rate(0.05)
        .with_weight_decay(0.0)
        .with_transform(ProbabilityTransform::BradleyTerrySigmoid);
    let outcome = train(&training, model, &mut loader, &device).unwrap();

    let losses = outcome.history.validation_losses();
    let first = losses[0];
    let last = *losses.last().unwrap();
    assert!(last < first, "validation loss should drop: {first:.4} -> {last:.4}");
    assert!(
        outcome.evaluation.accuracy.training_accuracy() > 0.5,
        "training accuracy {}",
        outcome.evaluation.accuracy.training_accuracy()
    );
}

#[test]
fn test_training_with_debug_asserts() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(4)
        .with_train_percent(0.75)
        .with_load_to_ram(true)
        .with_seed(Some(9))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(separable_pairs(16, 3), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);

    // 12 training pairs in batches of 5 -> 5, 5, 2
    let training = TrainingConfig::new()
        .with_epochs(2)
        .with_batch_size(5)
        .with_debug_asserts(true);
    let outcome = train(&training, model, &mut loader, &device).unwrap();
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(outcome.evaluation.accuracy.training_total, 12);
}

#[test]
fn test_dimension_mismatch_rejected_before_training() {
    let device = Default::default();
    let mut loader = memory_loader(indexed_pairs(10), LoaderConfig::new().with_seed(Some(1)));
    let model = PairScorerConfig::new(DIM + 1)
        .with_hidden1(8)
        .with_hidden2(4)
        .init::<TestAutodiffBackend>(&device);

    let result = train(&TrainingConfig::new().with_epochs(1), model, &mut loader, &device);
    assert!(matches!(result, Err(RankingError::InvalidConfig(_))));
}

#[test]
fn test_unloadable_dataset_fails_at_init() {
    let device = Default::default();
    let source = Arc::new(InMemorySource::with_dataset("empty", Vec::new()));
    let mut loader = PairedDatasetLoader::new("empty", source, LoaderConfig::new()).unwrap();
    let model = small_scorer::<TestAutodiffBackend>(&device);

    let err = train(&TrainingConfig::new().with_epochs(1), model, &mut loader, &device).unwrap_err();
    assert!(matches!(
        err,
        RankingError::During {
            phase: TrainingPhase::Init,
            ..
        }
    ));
    assert!(matches!(err.root(), RankingError::DataUnavailable { .. }));
}

#[test]
fn test_starvation_inside_loop_reports_position() {
    let source = Arc::new(FlakySource {
        inner: InMemorySource::with_dataset("flaky", indexed_pairs(12)),
        fail: AtomicBool::new(false),
    });
    // 9 training pairs, 3 validation
    let config = LoaderConfig::new()
        .with_buffer_size(4)
        .with_train_percent(0.75)
        .with_seed(Some(2))
        .with_starvation_timeout_ms(5_000);
    let mut loader = PairedDatasetLoader::new("flaky", source.clone(), config).unwrap();
    loader.load_dataset().unwrap();
    source.fail.store(true, Ordering::SeqCst);

    let device = Default::default();
    let model = small_scorer::<TestAutodiffBackend>(&device);
    let training = TrainingConfig::new().with_epochs(2).with_batch_size(4);
    let err = train(&training, model, &mut loader, &device).unwrap_err();

    match &err {
        RankingError::During { phase, epoch, batch, .. } => {
            assert_eq!(*phase, TrainingPhase::BatchTrain);
            assert_eq!(*epoch, 1);
            assert_eq!(*batch, 1);
        }
        other => panic!("expected a positioned error, got {other:?}"),
    }
    assert!(matches!(err.root(), RankingError::DataUnavailable { .. }));
}

#[test]
fn test_empty_validation_split_rejected_at_init() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_train_percent(1.0)
        .with_seed(Some(6))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(indexed_pairs(10), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);

    let err = train(&TrainingConfig::new().with_epochs(2), model, &mut loader, &device).unwrap_err();
    assert!(matches!(
        err,
        RankingError::During {
            phase: TrainingPhase::Init,
            epoch: 0,
            batch: 0,
            ..
        }
    ));
    match err.root() {
        RankingError::DataUnavailable { dataset, reason } => {
            assert_eq!(dataset, "synthetic");
            assert!(reason.contains("validation split is empty"), "{reason}");
        }
        other => panic!("expected DataUnavailable, got {other:?}"),
    }
}

#[test]
fn test_diverging_loss_aborts_batch() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(8)
        .with_train_percent(0.8)
        .with_seed(Some(17))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(separable_pairs(20, 19), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);

    // One optimizer step at this rate overflows the weights; the ratio of
    // infinite scores is NaN.
    let training = TrainingConfig::new()
        .with_epochs(3)
        .with_batch_size(2)
        .with_learning_rate(1e38)
        .with_transform(ProbabilityTransform::BradleyTerryRatio);
    let err = train(&training, model, &mut loader, &device).unwrap_err();

    match &err {
        RankingError::During { phase, epoch, batch, .. } => {
            assert_eq!(*phase, TrainingPhase::BatchTrain);
            assert_eq!(*epoch, 1);
            assert!(*batch >= 1, "the untrained model cannot produce NaN");
        }
        other => panic!("expected a positioned error, got {other:?}"),
    }
    assert!(matches!(err.root(), RankingError::NaNGradient { .. }), "{err}");
}

/// Scores by the first embedding component while training and returns a
/// constant when evaluating, so only training batches see mixed-sign scores.
#[derive(Module, Debug)]
struct FirstComponentScorer<B: Backend> {
    scale: Param<Tensor<B, 1>>,
}

impl<B: Backend> FirstComponentScorer<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            scale: Param::from_tensor(Tensor::ones([1], device)),
        }
    }
}

impl<B: Backend> ScoreNetwork<B> for FirstComponentScorer<B> {
    fn score(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, _] = embeddings.dims();
        if B::ad_enabled() {
            embeddings.slice([0..batch, 0..1]).squeeze::<1>(1) * self.scale.val()
        } else {
            Tensor::ones([batch], &embeddings.device())
        }
    }

    fn input_dim(&self) -> usize {
        DIM
    }

    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        vec![("scale".to_string(), vec![1])]
    }

    fn model_type(&self) -> &'static str {
        "first-component"
    }
}

impl<B: AutodiffBackend> RankingScorer<B> for FirstComponentScorer<B> {
    fn nan_gradients(&self, _grads: &GradientsParams) -> Vec<String> {
        Vec::new()
    }
}

#[test]
fn test_out_of_range_probability_aborts_in_debug_mode() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(4)
        .with_train_percent(0.75)
        .with_seed(Some(23))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(indexed_pairs(12), config);
    let model = FirstComponentScorer::<TestAutodiffBackend>::new(&device);

    // x scores i and y scores -i, so the ratio is i / 1e-6 for every i > 0.
    let training = TrainingConfig::new()
        .with_epochs(2)
        .with_batch_size(4)
        .with_transform(ProbabilityTransform::BradleyTerryRatio)
        .with_debug_asserts(true);
    let err = train(&training, model, &mut loader, &device).unwrap_err();

    assert!(matches!(
        err,
        RankingError::During {
            phase: TrainingPhase::BatchTrain,
            epoch: 1,
            batch: 0,
            ..
        }
    ), "{err}");
    match err.root() {
        RankingError::ScoreRange { value } => assert!(*value > 1.0, "{value}"),
        other => panic!("expected ScoreRange, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Checkpoint + end-to-end task
// ---------------------------------------------------------------------------

#[test]
fn test_trained_checkpoint_round_trip() {
    let device = Default::default();
    let config = LoaderConfig::new()
        .with_buffer_size(8)
        .with_train_percent(0.75)
        .with_seed(Some(4))
        .with_starvation_timeout_ms(5_000);
    let mut loader = memory_loader(separable_pairs(16, 11), config);
    let model = small_scorer::<TestAutodiffBackend>(&device);
    let outcome = train(&TrainingConfig::new().with_epochs(2).with_batch_size(4), model, &mut loader, &device)
        .unwrap();

    let trained = outcome.model.valid();
    let (blob, metadata) =
        CheckpointCodec::encode::<TestBackend, _>(&trained, "synthetic/model.ckpt", "2024-03-01").unwrap();

    let template = small_scorer::<TestBackend>(&device);
    let predictor =
        PairPredictor::<TestBackend, _>::from_checkpoint(&template, &blob, ProbabilityTransform::Elo, device)
            .unwrap();
    assert_eq!(predictor.metadata(), Some(&metadata));

    let original = PairPredictor::<TestBackend, _>::new(trained, ProbabilityTransform::Elo, device);
    let x = [0.5f32, -1.0, 2.0, 0.0];
    let y = [-0.5f32, 1.0, -2.0, 0.0];
    let a = original.predict_pair(&x, &y).unwrap();
    let b = predictor.predict_pair(&x, &y).unwrap();
    assert!((a.score_x - b.score_x).abs() < 1e-6);
    assert!((a.probability - b.probability).abs() < 1e-6);

    // Flipping a byte in the model dict is caught by the hash check
    let mut tampered = blob.clone();
    let last = tampered.len() / 2;
    tampered[last] ^= 0xff;
    assert!(CheckpointCodec::load::<TestBackend, _>(&template, &tampered, &device).is_err());
}

fn run_task_against(store: Arc<dyn ObjectStore>) {
    let pairs = separable_pairs(24, 5);
    seed_store(store.as_ref(), "environmental", &pairs);

    let mut task = TrainingTask::new("environmental", 2, 0.01, 8, 0.75);
    task.training_batch_size = 4;
    task.hidden1 = 16;
    task.hidden2 = 8;
    task.seed = Some(13);
    task.starvation_timeout_ms = 5_000;

    let device = Default::default();
    let artifacts = run_training_task::<TestAutodiffBackend>(&task, Arc::clone(&store), &device).unwrap();

    assert!(artifacts.checkpoint_path.starts_with("environmental/models/ranking/ab_ranking/"));
    assert!(artifacts.checkpoint_path.ends_with(".ckpt"));
    assert_eq!(artifacts.history.len(), 2);
    assert_eq!(artifacts.accuracy.training_total, 18);
    assert_eq!(artifacts.accuracy.validation_total, 6);

    // Checkpoint restores into a fresh scorer and carries the same hash
    let template = task.scorer_config(DIM).init::<TestBackend>(&device);
    let (restored, metadata) = CheckpointCodec::load_from_store::<TestBackend, _>(
        &template,
        store.as_ref(),
        DATASETS_BUCKET,
        &artifacts.checkpoint_path,
        &device,
    )
    .unwrap();
    assert_eq!(metadata, artifacts.metadata);
    assert_eq!(restored.input_dim(), DIM);

    let report = store.get(DATASETS_BUCKET, &artifacts.report_path).unwrap();
    let report = String::from_utf8(report).unwrap();
    assert!(report.contains(&format!("model_hash: {}", metadata.model_hash)), "{report}");
    assert!(report.contains("training_size: 18"), "{report}");

    let card: serde_json::Value =
        serde_json::from_slice(&store.get(DATASETS_BUCKET, &artifacts.model_card_path).unwrap()).unwrap();
    assert_eq!(card["model_file_hash"], metadata.model_hash);
    assert_eq!(card["predictions_path"], artifacts.predictions_path);

    let tmp = TempDir::new().unwrap();
    let parquet_path = tmp.path().join("predictions.parquet");
    std::fs::write(&parquet_path, store.get(DATASETS_BUCKET, &artifacts.predictions_path).unwrap()).unwrap();
    let records = PredictionReader::read_all(&parquet_path).unwrap();
    assert_eq!(records.len(), 24);
}

#[test]
fn test_training_task_end_to_end_memory_store() {
    run_task_against(Arc::new(MemoryObjectStore::new()));
}

#[test]
fn test_training_task_end_to_end_local_store() {
    let tmp = TempDir::new().unwrap();
    run_task_against(Arc::new(LocalObjectStore::new(tmp.path())));
    let datasets = tmp.path().join(DATASETS_BUCKET).join("environmental/models/ranking/ab_ranking");
    let written = std::fs::read_dir(datasets).unwrap().count();
    assert_eq!(written, 4);
}

#[test]
fn test_training_task_rejects_bad_descriptor() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let task = TrainingTask::new("environmental", 0, 0.01, 8, 0.75);
    let device = Default::default();
    let result = run_training_task::<TestAutodiffBackend>(&task, store, &device);
    assert!(matches!(result, Err(RankingError::InvalidConfig(_))));
}

/// Store that refuses writes of paths ending in `suffix`.
struct ReadOnlySuffix {
    inner: MemoryObjectStore,
    suffix: &'static str,
}

impl ObjectStore for ReadOnlySuffix {
    fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(bucket, path)
    }

    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if path.ends_with(self.suffix) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(bucket, path, bytes)
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(bucket, prefix)
    }
}

#[test]
fn test_training_task_errors_carry_phase() {
    let device = Default::default();
    let mut task = TrainingTask::new("environmental", 2, 0.01, 8, 0.75);
    task.training_batch_size = 4;
    task.hidden1 = 16;
    task.hidden2 = 8;
    task.seed = Some(29);
    task.starvation_timeout_ms = 5_000;

    // Nothing seeded: the load fails at Init
    let empty: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let err = run_training_task::<TestAutodiffBackend>(&task, empty, &device).unwrap_err();
    assert!(matches!(
        err,
        RankingError::During {
            phase: TrainingPhase::Init,
            ..
        }
    ), "{err}");
    assert!(matches!(err.root(), RankingError::DataUnavailable { .. }));

    // Report upload fails after the checkpoint is written
    let store = Arc::new(ReadOnlySuffix {
        inner: MemoryObjectStore::new(),
        suffix: ".txt",
    });
    seed_store(store.as_ref(), "environmental", &separable_pairs(16, 31));
    let err = run_training_task::<TestAutodiffBackend>(&task, store.clone(), &device).unwrap_err();
    match &err {
        RankingError::During { phase, epoch, .. } => {
            assert_eq!(*phase, TrainingPhase::Checkpoint);
            assert_eq!(*epoch, 2);
        }
        other => panic!("expected a positioned error, got {other:?}"),
    }
    assert!(matches!(err.root(), RankingError::Store(StoreError::Io(_))));
}
