//! Loss Functions
//!
//! Binary losses computed directly on logits against float targets in {0, 1}.

use std::fmt;

use burn::tensor::{activation::sigmoid, backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::utils::error::{invalid_choice, GestureError, Result};

/// A binary loss on logits, reduced by mean over the batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LossFunction {
    /// Binary cross-entropy with logits
    BinaryCrossEntropy,
    /// Focal loss: BCE scaled by `(1 - p_t)^gamma`
    Focal { gamma: f64 },
}

impl LossFunction {
    pub const ACCEPTED: [&'static str; 4] = ["bce", "binary-cross-entropy", "focal", "focal-loss"];

    /// Build a loss from its configured name and the focal gamma
    pub fn from_name(name: &str, focal_gamma: f64) -> Result<Self> {
        match name {
            "bce" | "binary-cross-entropy" => Ok(LossFunction::BinaryCrossEntropy),
            "focal" | "focal-loss" => {
                if !(focal_gamma.is_finite() && focal_gamma >= 0.0) {
                    return Err(GestureError::InvalidConfiguration(format!(
                        "focal_gamma must be >= 0, got {}",
                        focal_gamma
                    )));
                }
                Ok(LossFunction::Focal { gamma: focal_gamma })
            }
            other => Err(invalid_choice("loss function", other, &Self::ACCEPTED)),
        }
    }

    /// Mean loss over the batch.
    ///
    /// `logits` and `targets` have shape `[batch]`; the result has shape `[1]`.
    pub fn forward<B: Backend>(&self, logits: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            LossFunction::BinaryCrossEntropy => bce_with_logits(logits, targets).mean(),
            LossFunction::Focal { gamma } => {
                let probs = sigmoid(logits.clone());
                let bce = bce_with_logits(logits, targets.clone());
                // p_t = p for positives, 1 - p for negatives
                let p_t = probs.clone() * targets.clone()
                    + (probs.neg() + 1.0) * (targets.neg() + 1.0);
                let modulating = (p_t.neg() + 1.0).powf_scalar(*gamma as f32);
                (modulating * bce).mean()
            }
        }
    }
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossFunction::BinaryCrossEntropy => write!(f, "bce"),
            LossFunction::Focal { gamma } => write!(f, "focal(gamma={})", gamma),
        }
    }
}

/// Per-sample BCE on logits: `max(x, 0) - x * y + ln(1 + e^-|x|)`
fn bce_with_logits<B: Backend>(logits: Tensor<B, 1>, targets: Tensor<B, 1>) -> Tensor<B, 1> {
    let softplus_tail = logits.clone().abs().neg().exp().log1p();
    logits.clone().clamp_min(0.0) - logits * targets + softplus_tail
}
