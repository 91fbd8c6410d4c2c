//! Scoring network capability and the default MLP scorer.
//!
//! ```text
//! (batch, input_dim)
//!   → Linear(input_dim→hidden1) → ReLU → Dropout
//!   → Linear(hidden1→hidden2) → ReLU → Dropout
//!   → Linear(hidden2→1) → squeeze
//!   → score: (batch,)
//! ```

use burn::module::AutodiffModule;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::error::RankingError;

/// Model type stamped into checkpoints produced from [`PairScorer`].
pub const PAIR_SCORER_MODEL_TYPE: &str = "image-pair-ranking-mlp";

/// A module that maps embeddings to one scalar score each.
pub trait ScoreNetwork<B: Backend>: Module<B> {
    /// Score a batch of embeddings: `(batch, input_dim)` → `(batch,)`.
    fn score(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 1>;

    /// Embedding dimension the network accepts.
    fn input_dim(&self) -> usize;

    /// Name and shape of every parameter tensor, in a fixed order.
    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)>;

    /// Model type recorded in checkpoint metadata.
    fn model_type(&self) -> &'static str;
}

/// A trainable scorer: the autodiff side of a [`ScoreNetwork`].
///
/// Backward passes and optimizer steps go through burn's own machinery
/// (`Tensor::backward`, `Optimizer::step`); this trait adds what the training
/// loop needs on top of that.
pub trait RankingScorer<B: AutodiffBackend>: ScoreNetwork<B> + AutodiffModule<B> {
    /// Names of parameters whose gradient contains NaN.
    fn nan_gradients(&self, grads: &GradientsParams) -> Vec<String>;
}

/// Configuration for the default pair scorer MLP.
#[derive(Config, Debug)]
pub struct PairScorerConfig {
    /// Embedding dimension of the pair records.
    pub input_dim: usize,
    #[config(default = 512)]
    pub hidden1: usize,
    #[config(default = 64)]
    pub hidden2: usize,
    /// Dropout probability after each activation.
    #[config(default = 0.1)]
    pub dropout: f64,
}

/// Three-layer ReLU MLP producing one score per embedding.
#[derive(Module, Debug)]
pub struct PairScorer<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    output: Linear<B>,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl PairScorerConfig {
    /// Recover layer sizes from the parameter shapes stored in a checkpoint.
    ///
    /// Dropout is not recorded and comes back as 0.0; it has no effect on
    /// gradient-free scoring.
    pub fn from_parameter_shapes(shapes: &[(String, Vec<usize>)]) -> Result<Self, RankingError> {
        let weight = |name: &str| {
            shapes
                .iter()
                .find(|(n, _)| n == name)
                .and_then(|(_, shape)| match shape.as_slice() {
                    &[d_input, d_output] => Some((d_input, d_output)),
                    _ => None,
                })
                .ok_or_else(|| RankingError::CorruptCheckpoint(format!("no 2-d parameter '{name}'")))
        };
        let (input_dim, hidden1) = weight("linear1.weight")?;
        let (_, hidden2) = weight("linear2.weight")?;
        Ok(Self::new(input_dim)
            .with_hidden1(hidden1)
            .with_hidden2(hidden2)
            .with_dropout(0.0))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> PairScorer<B> {
        PairScorer {
            linear1: LinearConfig::new(self.input_dim, self.hidden1).init(device),
            linear2: LinearConfig::new(self.hidden1, self.hidden2).init(device),
            output: LinearConfig::new(self.hidden2, 1).init(device),
            dropout1: DropoutConfig::new(self.dropout).init(),
            dropout2: DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> PairScorer<B> {
    pub fn forward(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 1> {
        let x = self.linear1.forward(embeddings);
        let x = burn::tensor::activation::relu(x);
        let x = self.dropout1.forward(x);

        let x = self.linear2.forward(x);
        let x = burn::tensor::activation::relu(x);
        let x = self.dropout2.forward(x);

        self.output.forward(x).squeeze::<1>(1)
    }

    fn layers(&self) -> [(&'static str, &Linear<B>); 3] {
        [
            ("linear1", &self.linear1),
            ("linear2", &self.linear2),
            ("output", &self.output),
        ]
    }
}

impl<B: Backend> ScoreNetwork<B> for PairScorer<B> {
    fn score(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 1> {
        self.forward(embeddings)
    }

    fn input_dim(&self) -> usize {
        // burn stores linear weights as (d_input, d_output)
        self.linear1.weight.val().dims()[0]
    }

    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = Vec::with_capacity(6);
        for (name, layer) in self.layers() {
            shapes.push((format!("{name}.weight"), layer.weight.val().dims().to_vec()));
            if let Some(bias) = &layer.bias {
                shapes.push((format!("{name}.bias"), bias.val().dims().to_vec()));
            }
        }
        shapes
    }

    fn model_type(&self) -> &'static str {
        PAIR_SCORER_MODEL_TYPE
    }
}

impl<B: AutodiffBackend> RankingScorer<B> for PairScorer<B> {
    fn nan_gradients(&self, grads: &GradientsParams) -> Vec<String> {
        let mut bad = Vec::new();
        for (name, layer) in self.layers() {
            let weight_nan = grads
                .get::<B::InnerBackend, 2>(layer.weight.id)
                .is_some_and(contains_nan);
            if weight_nan {
                bad.push(format!("{name}.weight"));
            }
            let bias_nan = layer
                .bias
                .as_ref()
                .and_then(|bias| grads.get::<B::InnerBackend, 1>(bias.id))
                .is_some_and(contains_nan);
            if bias_nan {
                bad.push(format!("{name}.bias"));
            }
        }
        bad
    }
}

/// True when any element is NaN. Opposite infinities also sum to NaN, which
/// is just as fatal for an optimizer step.
pub(crate) fn contains_nan<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> bool {
    let total: f64 = tensor.sum().into_scalar().elem();
    total.is_nan()
}
