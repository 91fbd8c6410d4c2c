//! Scoring embeddings and pairs with a trained scorer.

use std::marker::PhantomData;

use burn::prelude::*;

use crate::checkpoint::{CheckpointCodec, ModelMetadata};
use crate::error::RankingError;
use crate::model::bridge::{embeddings_to_tensor, tensor_to_vec};
use crate::model::scorer::ScoreNetwork;
use crate::training::transform::ProbabilityTransform;

/// Predicted scores and preference probability for one pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairPrediction {
    pub score_x: f64,
    pub score_y: f64,
    /// Probability that x is preferred over y.
    pub probability: f64,
}

/// A trained scorer bound to a device and probability transform.
pub struct PairPredictor<B: Backend, M: ScoreNetwork<B>> {
    model: M,
    transform: ProbabilityTransform,
    device: B::Device,
    metadata: Option<ModelMetadata>,
    _backend: PhantomData<B>,
}

impl<B: Backend, M: ScoreNetwork<B>> PairPredictor<B, M> {
    pub fn new(model: M, transform: ProbabilityTransform, device: B::Device) -> Self {
        Self {
            model,
            transform,
            device,
            metadata: None,
            _backend: PhantomData,
        }
    }

    /// Restore the scorer from a checkpoint blob into a copy of `template`.
    pub fn from_checkpoint(
        template: &M,
        blob: &[u8],
        transform: ProbabilityTransform,
        device: B::Device,
    ) -> Result<Self, RankingError> {
        let (model, metadata) = CheckpointCodec::load(template, blob, &device)?;
        tracing::info!(
            model_type = %metadata.model_type,
            model_hash = %metadata.model_hash,
            date = %metadata.date,
            "Loaded scorer from checkpoint"
        );
        Ok(Self {
            model,
            transform,
            device,
            metadata: Some(metadata),
            _backend: PhantomData,
        })
    }

    /// Metadata of the checkpoint this predictor was loaded from, if any.
    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    /// Score a batch of embeddings.
    pub fn score_batch(&self, embeddings: &[&[f32]]) -> Result<Vec<f64>, RankingError> {
        if embeddings.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.model.input_dim();
        if let Some((i, e)) = embeddings.iter().enumerate().find(|(_, e)| e.len() != dim) {
            return Err(RankingError::InvalidPair {
                key: format!("query[{i}]"),
                reason: format!("embedding dimension {} != {dim}", e.len()),
            });
        }
        let tensor = embeddings_to_tensor::<B>(embeddings, &self.device);
        Ok(tensor_to_vec(self.model.score(tensor)))
    }

    /// Score a single embedding.
    pub fn score(&self, embedding: &[f32]) -> Result<f64, RankingError> {
        let scores = self.score_batch(&[embedding])?;
        scores.first().copied().ok_or_else(|| RankingError::InvalidPair {
            key: "query".to_string(),
            reason: "scorer returned no value".to_string(),
        })
    }

    /// Score both sides of a pair and the probability that x is preferred.
    pub fn predict_pair(&self, x: &[f32], y: &[f32]) -> Result<PairPrediction, RankingError> {
        let scores = self.score_batch(&[x, y])?;
        let (score_x, score_y) = (scores[0], scores[1]);
        Ok(PairPrediction {
            score_x,
            score_y,
            probability: self.transform.probability(score_x, score_y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scorer::{PairScorer, PairScorerConfig};
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_scorer(device: &<TestBackend as Backend>::Device) -> PairScorer<TestBackend> {
        PairScorerConfig::new(4)
            .with_hidden1(4)
            .with_hidden2(2)
            .with_dropout(0.0)
            .init::<TestBackend>(device)
    }

    #[test]
    fn test_score_matches_batch() {
        let device = Default::default();
        let predictor = PairPredictor::new(small_scorer(&device), ProbabilityTransform::Elo, device);
        let a = [0.1_f32, 0.2, 0.3, 0.4];
        let b = [-1.0_f32, 0.5, 2.0, 0.0];

        let batch = predictor.score_batch(&[&a, &b]).unwrap();
        let single_a = predictor.score(&a).unwrap();
        let single_b = predictor.score(&b).unwrap();
        assert!((batch[0] - single_a).abs() < 1e-5);
        assert!((batch[1] - single_b).abs() < 1e-5);
        assert!(predictor.score_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_predict_pair_is_swap_symmetric() {
        let device = Default::default();
        let predictor = PairPredictor::new(small_scorer(&device), ProbabilityTransform::Elo, device);
        let a = [1.0_f32, 0.0, 0.5, 0.25];
        let b = [0.0_f32, 1.0, -0.5, 0.75];

        let ab = predictor.predict_pair(&a, &b).unwrap();
        let ba = predictor.predict_pair(&b, &a).unwrap();
        assert!((ab.probability + ba.probability - 1.0).abs() < 1e-5);
        assert!((ab.score_x - ba.score_y).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let device = Default::default();
        let predictor = PairPredictor::new(small_scorer(&device), ProbabilityTransform::Elo, device);
        assert!(matches!(
            predictor.score(&[1.0, 2.0]),
            Err(RankingError::InvalidPair { .. })
        ));
    }

    #[test]
    fn test_from_checkpoint() {
        let device = Default::default();
        let trained = small_scorer(&device);
        let (blob, metadata) =
            CheckpointCodec::encode::<TestBackend, _>(&trained, "env/m.ckpt", "2024-03-01").unwrap();

        let predictor = PairPredictor::<TestBackend, _>::from_checkpoint(
            &small_scorer(&device),
            &blob,
            ProbabilityTransform::Elo,
            device,
        )
        .unwrap();
        assert_eq!(predictor.metadata(), Some(&metadata));

        let x = [0.3_f32, -0.2, 0.9, 0.0];
        let expected = PairPredictor::new(trained, ProbabilityTransform::Elo, Default::default())
            .score(&x)
            .unwrap();
        assert!((predictor.score(&x).unwrap() - expected).abs() < 1e-6);
    }
}
