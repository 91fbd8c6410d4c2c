//! Pairwise forward pass and L1 preference loss.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::model::scorer::RankingScorer;
use crate::training::transform::ProbabilityTransform;

/// Scores and probabilities from one pairwise forward pass, shape `(batch,)` each.
pub struct PairForward<B: Backend> {
    pub score_x: Tensor<B, 1>,
    /// Leaf tensor: receives gradient, but does not propagate it into the scorer.
    pub score_y: Tensor<B, 1>,
    pub probability: Tensor<B, 1>,
}

/// Score both sides of a batch and map them to preference probabilities.
///
/// Both sides run through the same trainable scorer, so dropout applies to
/// each. `score_y` is then cut from the graph and re-attached as a fresh leaf
/// requiring gradients: one loss reaches both score tensors while only the x
/// branch updates parameters.
pub fn pairwise_forward<B, M>(
    model: &M,
    x: Tensor<B, 2>,
    y: Tensor<B, 2>,
    transform: ProbabilityTransform,
) -> PairForward<B>
where
    B: AutodiffBackend,
    M: RankingScorer<B>,
{
    let score_y = Tensor::<B, 1>::from_inner(model.score(y).inner()).require_grad();
    let score_x = model.score(x);
    let probability = transform.forward(score_x.clone(), score_y.clone());
    PairForward {
        score_x,
        score_y,
        probability,
    }
}

/// Mean absolute error between predicted probabilities and targets.
///
/// Returns a scalar loss tensor of shape `(1,)`.
pub fn l1_loss<B: Backend>(probability: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    (probability - targets).abs().mean()
}
