//! Score-to-probability transforms.
//!
//! Each transform maps a pair of scalar scores `(s_x, s_y)` to the probability
//! that `x` is preferred over `y`. The scalar form is used for reporting and
//! tests; the tensor form sits on the autodiff graph during training.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::RankingError;

/// Elo rating scale: a 400-point gap means 10:1 odds.
pub const ELO_SCALE: f64 = 400.0;
/// Temperature of the Bradley-Terry sigmoid form.
pub const SIGMOID_SCALE: f64 = 50.0;
/// Added to the denominator of the Bradley-Terry ratio form.
pub const RATIO_EPSILON: f64 = 1e-6;
/// Allowed deviation of `P(x,y) + P(y,x)` from 1 for symmetric transforms.
pub const SYMMETRY_TOLERANCE: f64 = 1e-5;
/// Slack on the [0, 1] range check, absorbing f32 rounding.
const RANGE_TOLERANCE: f64 = 1e-6;

/// Mapping from a pair of scores to a preference probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbabilityTransform {
    /// `1 / (1 + 10^((s_y - s_x) / 400))`
    #[default]
    Elo,
    /// `sigmoid((s_x - s_y) / 50)`
    BradleyTerrySigmoid,
    /// `s_x / (s_x + s_y + eps)`, only meaningful for positive scores.
    BradleyTerryRatio,
}

impl ProbabilityTransform {
    /// Probability that `x` is preferred, computed in f64.
    pub fn probability(self, s_x: f64, s_y: f64) -> f64 {
        match self {
            Self::Elo => 1.0 / (1.0 + 10f64.powf((s_y - s_x) / ELO_SCALE)),
            Self::BradleyTerrySigmoid => 1.0 / (1.0 + (-(s_x - s_y) / SIGMOID_SCALE).exp()),
            Self::BradleyTerryRatio => s_x / (s_x + s_y + RATIO_EPSILON),
        }
    }

    /// Differentiable probability for a batch of score pairs, shape `(batch,)`.
    pub fn forward<B: Backend>(self, s_x: Tensor<B, 1>, s_y: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            Self::Elo => {
                // 10^z = exp(z * ln 10)
                let exponent = (s_y - s_x)
                    .div_scalar(ELO_SCALE)
                    .mul_scalar(std::f64::consts::LN_10);
                exponent.exp().add_scalar(1.0).recip()
            }
            Self::BradleyTerrySigmoid => {
                burn::tensor::activation::sigmoid((s_x - s_y).div_scalar(SIGMOID_SCALE))
            }
            Self::BradleyTerryRatio => {
                let denominator = (s_x.clone() + s_y).add_scalar(RATIO_EPSILON);
                s_x / denominator
            }
        }
    }

    /// Whether `P(x,y) + P(y,x) = 1` holds for this transform.
    ///
    /// The ratio form only satisfies it approximately, because of epsilon.
    pub fn is_swap_symmetric(self) -> bool {
        !matches!(self, Self::BradleyTerryRatio)
    }

    /// Reject probabilities outside [0, 1] (or NaN).
    pub fn check_range(probability: f64) -> Result<(), RankingError> {
        let in_range = probability >= -RANGE_TOLERANCE && probability <= 1.0 + RANGE_TOLERANCE;
        if in_range {
            Ok(())
        } else {
            Err(RankingError::ScoreRange { value: probability })
        }
    }

    /// Check swap symmetry for one score pair. Asymmetric transforms always pass.
    pub fn check_symmetry(self, s_x: f64, s_y: f64) -> Result<(), RankingError> {
        if !self.is_swap_symmetric() {
            return Ok(());
        }
        let deviation = (self.probability(s_x, s_y) + self.probability(s_y, s_x) - 1.0).abs();
        if deviation > SYMMETRY_TOLERANCE {
            return Err(RankingError::DebugAssertion(format!(
                "{self} transform not swap-symmetric for scores ({s_x}, {s_y}): deviation {deviation:.2e}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ProbabilityTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elo => write!(f, "elo"),
            Self::BradleyTerrySigmoid => write!(f, "bradley-terry-sigmoid"),
            Self::BradleyTerryRatio => write!(f, "bradley-terry-ratio"),
        }
    }
}

impl FromStr for ProbabilityTransform {
    type Err = RankingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elo" => Ok(Self::Elo),
            "bradley-terry-sigmoid" | "sigmoid" => Ok(Self::BradleyTerrySigmoid),
            "bradley-terry-ratio" | "ratio" => Ok(Self::BradleyTerryRatio),
            other => Err(RankingError::InvalidConfig(format!(
                "unknown probability transform '{other}'"
            ))),
        }
    }
}
