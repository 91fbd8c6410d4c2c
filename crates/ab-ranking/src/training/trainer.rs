//! Epoch-driven training loop for pairwise ranking.
//!
//! Epoch 0 only measures validation loss (its training loss is defined as the
//! validation loss). Every later epoch drains the training buffer in batches,
//! steps AdamW on the L1 loss between predicted and target probabilities, then
//! hits the loader's epoch barrier. After the last epoch both splits are
//! scored once more to produce per-pair predictions and ordering accuracy.

use std::time::Instant;

use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use pair_store::{PredictionRecord, Split};

use crate::error::{RankingError, TrainingPhase};
use crate::model::bridge::tensor_to_vec;
use crate::model::scorer::{RankingScorer, ScoreNetwork};
use crate::training::data::{PairBatch, PairedDatasetLoader};
use crate::training::loss::{l1_loss, pairwise_forward};
use crate::training::metrics::{mean, AccuracyStats, EpochMetrics, MetricsHistory};
use crate::training::transform::ProbabilityTransform;

/// Hyperparameters of a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Number of epochs, including the evaluation-only epoch 0.
    #[config(default = 10)]
    pub epochs: usize,
    /// Pairs per optimizer step.
    #[config(default = 1)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// Weight decay for AdamW.
    #[config(default = 0.01)]
    pub weight_decay: f64,
    #[config(default = "ProbabilityTransform::Elo")]
    pub transform: ProbabilityTransform,
    /// Check batch shapes, probability range, swap symmetry and per-parameter
    /// NaN gradients. Slows training noticeably.
    #[config(default = false)]
    pub debug_asserts: bool,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), RankingError> {
        if self.epochs == 0 {
            return Err(RankingError::InvalidConfig("epochs must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(RankingError::InvalidConfig("batch_size must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RankingError::InvalidConfig(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(RankingError::InvalidConfig(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

/// Per-pair predictions and accuracy from the post-training pass.
#[derive(Debug, Clone, Default)]
pub struct FinalEvaluation {
    /// Training-split predictions first, then validation, each in evaluation order.
    pub predictions: Vec<PredictionRecord>,
    pub accuracy: AccuracyStats,
}

impl FinalEvaluation {
    pub fn split(&self, split: Split) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions.iter().filter(move |p| p.split == split)
    }
}

/// Everything a finished training run produces.
#[derive(Debug)]
pub struct TrainingOutcome<M> {
    pub model: M,
    pub history: MetricsHistory,
    pub evaluation: FinalEvaluation,
}

/// Size of each batch in an epoch: `batch_size` everywhere except a shorter
/// final batch covering the remainder.
pub fn batch_sizes(num_features: usize, batch_size: usize) -> Vec<usize> {
    if batch_size == 0 {
        return Vec::new();
    }
    let num_batches = num_features.div_ceil(batch_size);
    (0..num_batches)
        .map(|i| {
            if i == num_batches - 1 {
                num_features - i * batch_size
            } else {
                batch_size
            }
        })
        .collect()
}

/// Run the training loop.
///
/// The loader is loaded on demand. Returns the trained scorer with its
/// per-epoch metrics and the final evaluation; persisting the model is left
/// to [`crate::checkpoint::CheckpointCodec`].
pub fn train<B, M>(
    config: &TrainingConfig,
    mut model: M,
    loader: &mut PairedDatasetLoader,
    device: &B::Device,
) -> Result<TrainingOutcome<M>, RankingError>
where
    B: AutodiffBackend,
    M: RankingScorer<B>,
    M::InnerModule: ScoreNetwork<B::InnerBackend>,
{
    config.validate()?;
    if !loader.is_loaded() {
        loader
            .load_dataset()
            .map_err(|e| e.during(TrainingPhase::Init, 0, 0))?;
    }
    if loader.validation_len() == 0 {
        return Err(RankingError::unavailable(
            loader.dataset_name(),
            format!(
                "validation split is empty ({} training pairs); lower train_percent",
                loader.training_len()
            ),
        )
        .during(TrainingPhase::Init, 0, 0));
    }
    if model.input_dim() != loader.embedding_dim() {
        return Err(RankingError::InvalidConfig(format!(
            "scorer expects {}-dim embeddings, dataset has {}",
            model.input_dim(),
            loader.embedding_dim()
        )));
    }

    let num_features = loader.training_len();
    let batches = batch_sizes(num_features, config.batch_size);
    let mut optimizer = AdamWConfig::new()
        .with_weight_decay(config.weight_decay as f32)
        .init();

    tracing::info!(
        dataset = %loader.dataset_name(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        batches_per_epoch = batches.len(),
        training_pairs = num_features,
        validation_pairs = loader.validation_len(),
        lr = config.learning_rate,
        weight_decay = config.weight_decay,
        transform = %config.transform,
        "Starting training"
    );

    let pb = ProgressBar::new(config.epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} epochs ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let train_start = Instant::now();
    let mut history = MetricsHistory::new();

    for epoch in 0..config.epochs {
        let mut batch_losses = Vec::with_capacity(batches.len());

        // Epoch 0 only measures the untrained model.
        if epoch != 0 {
            loader
                .spawn_filling_workers()
                .map_err(|e| e.during(TrainingPhase::FillBuffer, epoch, 0))?;

            for (batch_idx, &want) in batches.iter().enumerate() {
                let at = |e: RankingError| e.during(TrainingPhase::BatchTrain, epoch, batch_idx);

                let batch = loader.next_training_feature_vectors_and_target(want).map_err(at)?;
                if config.debug_asserts {
                    check_batch_shape(&batch.pairs, want, model.input_dim()).map_err(at)?;
                }

                let (x, y, targets) = batch.pairs.to_tensors::<B>(device);
                let forward = pairwise_forward(&model, x, y, config.transform);
                if config.debug_asserts {
                    for p in tensor_to_vec(forward.probability.clone()) {
                        ProbabilityTransform::check_range(p).map_err(at)?;
                    }
                }

                let loss = l1_loss(forward.probability, targets);
                let loss_val: f64 = loss.clone().into_scalar().elem();
                if loss_val.is_nan() {
                    return Err(at(RankingError::NaNGradient {
                        parameter: "loss".to_string(),
                    }));
                }

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                if config.debug_asserts {
                    let bad = model.nan_gradients(&grads);
                    if !bad.is_empty() {
                        return Err(at(RankingError::NaNGradient {
                            parameter: bad.join(", "),
                        }));
                    }
                }
                model = optimizer.step(config.learning_rate, model, grads);
                batch_losses.push(loss_val);
            }

            loader
                .fill_training_data()
                .map_err(|e| e.during(TrainingPhase::FillBuffer, epoch, batches.len()))?;
        }

        let valid_model = model.valid();
        let validation_loss = validation_pass(
            &valid_model,
            loader.validation_feature_vectors_and_target(),
            config,
            device,
        )
        .map_err(|e| e.during(TrainingPhase::ValidationPass, epoch, 0))?;

        if validation_loss.is_nan() {
            return Err(RankingError::NaNGradient {
                parameter: "validation loss".to_string(),
            }
            .during(TrainingPhase::MetricsRecord, epoch, 0));
        }
        let training_loss = if batch_losses.is_empty() {
            validation_loss
        } else {
            mean(&batch_losses)
        };
        history.push(EpochMetrics {
            epoch,
            training_loss,
            validation_loss,
        });

        tracing::info!(
            epoch,
            training_loss = format!("{training_loss:.4}"),
            validation_loss = format!("{validation_loss:.4}"),
            "Epoch {epoch}/{}",
            config.epochs
        );
        pb.set_message(format!("loss={training_loss:.4} val={validation_loss:.4}"));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let valid_model = model.valid();
    let evaluation = final_evaluation(&valid_model, loader, config, &batches, device)?;

    tracing::info!(
        elapsed_s = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        training_correct = evaluation.accuracy.training_correct,
        training_total = evaluation.accuracy.training_total,
        validation_correct = evaluation.accuracy.validation_correct,
        validation_total = evaluation.accuracy.validation_total,
        "Training complete"
    );

    Ok(TrainingOutcome {
        model,
        history,
        evaluation,
    })
}

fn check_batch_shape(batch: &PairBatch, want: usize, dim: usize) -> Result<(), RankingError> {
    if batch.len() != want {
        return Err(RankingError::DebugAssertion(format!(
            "batch has {} pairs, expected {want}",
            batch.len()
        )));
    }
    let misshapen = batch
        .pairs()
        .iter()
        .any(|p| p.embedding_x().len() != dim || p.embedding_y().len() != dim);
    if misshapen {
        return Err(RankingError::DebugAssertion(format!(
            "batch embeddings do not match scorer input dimension {dim}"
        )));
    }
    Ok(())
}

/// Scores and probabilities for a batch, without gradients.
struct BatchScores {
    score_x: Vec<f64>,
    score_y: Vec<f64>,
    probability: Vec<f64>,
}

fn score_batch<B: Backend, M: ScoreNetwork<B>>(
    model: &M,
    batch: &PairBatch,
    transform: ProbabilityTransform,
    device: &B::Device,
) -> BatchScores {
    let (x, y, _) = batch.to_tensors::<B>(device);
    let score_x = model.score(x);
    let score_y = model.score(y);
    let probability = transform.forward(score_x.clone(), score_y.clone());
    BatchScores {
        score_x: tensor_to_vec(score_x),
        score_y: tensor_to_vec(score_y),
        probability: tensor_to_vec(probability),
    }
}

/// Mean L1 loss over the validation split, one pair at a time.
fn validation_pass<B: Backend, M: ScoreNetwork<B>>(
    model: &M,
    validation: &PairBatch,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<f64, RankingError> {
    let mut losses = Vec::with_capacity(validation.len());
    for pair in validation.pairs() {
        let single = PairBatch::from(vec![pair.clone()]);
        let scores = score_batch(model, &single, config.transform, device);
        for &p in &scores.probability {
            if config.debug_asserts {
                ProbabilityTransform::check_range(p)?;
            }
            losses.push((p - pair.target() as f64).abs());
        }
    }
    Ok(mean(&losses))
}

/// Score every training pair (in batches, through the buffer) and every
/// validation pair, recording predictions and ordering accuracy.
fn final_evaluation<B: Backend, M: ScoreNetwork<B>>(
    model: &M,
    loader: &mut PairedDatasetLoader,
    config: &TrainingConfig,
    batches: &[usize],
    device: &B::Device,
) -> Result<FinalEvaluation, RankingError> {
    let epoch = config.epochs;
    let mut predictions = Vec::with_capacity(loader.training_len() + loader.validation_len());

    loader
        .spawn_filling_workers()
        .map_err(|e| e.during(TrainingPhase::FinalEvaluation, epoch, 0))?;

    let mut pair_index = 0u64;
    for (batch_idx, &want) in batches.iter().enumerate() {
        let at = |e: RankingError| e.during(TrainingPhase::FinalEvaluation, epoch, batch_idx);
        let batch = loader.next_training_feature_vectors_and_target(want).map_err(at)?;
        let scores = score_batch(model, &batch.pairs, config.transform, device);
        record_predictions(&mut predictions, Split::Training, &mut pair_index, &batch.pairs, &scores, config)
            .map_err(at)?;
    }
    loader
        .wait_for_workers()
        .map_err(|e| e.during(TrainingPhase::FinalEvaluation, epoch, batches.len()))?;

    let validation = loader.validation_feature_vectors_and_target();
    let mut pair_index = 0u64;
    for (i, pair) in validation.pairs().iter().enumerate() {
        let single = PairBatch::from(vec![pair.clone()]);
        let scores = score_batch(model, &single, config.transform, device);
        record_predictions(&mut predictions, Split::Validation, &mut pair_index, &single, &scores, config)
            .map_err(|e| e.during(TrainingPhase::FinalEvaluation, epoch, i))?;
    }

    let accuracy = AccuracyStats::from_predictions(&predictions);
    Ok(FinalEvaluation {
        predictions,
        accuracy,
    })
}

fn record_predictions(
    out: &mut Vec<PredictionRecord>,
    split: Split,
    pair_index: &mut u64,
    batch: &PairBatch,
    scores: &BatchScores,
    config: &TrainingConfig,
) -> Result<(), RankingError> {
    for (i, pair) in batch.pairs().iter().enumerate() {
        let (score_x, score_y, probability) = (scores.score_x[i], scores.score_y[i], scores.probability[i]);
        if config.debug_asserts {
            ProbabilityTransform::check_range(probability)?;
            config.transform.check_symmetry(score_x, score_y)?;
        }
        out.push(PredictionRecord {
            split,
            pair_index: *pair_index,
            score_x,
            score_y,
            probability,
            target: pair.target() as f64,
        });
        *pair_index += 1;
    }
    Ok(())
}
