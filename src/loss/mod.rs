//! Supervised segmentation losses and knowledge distillation
//!
//! Losses return both the scalar and the gradient with respect to the
//! logits, keeping backward closed-form and autograd-free. The "initial"
//! recipe is plain cross entropy; the "continual" recipe is an unbiased
//! variant that redistributes background probability mass so old classes
//! absent from current ground truth are not penalized.

mod coordinator;
mod cross_entropy;
mod distill;
mod unbiased;

pub use coordinator::{DistillConfig, LossCoordinator, LossOutput, ModelContext};
pub use cross_entropy::CrossEntropyLoss;
pub use distill::DistillationLoss;
pub use unbiased::UnbiasedCrossEntropyLoss;

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

/// A supervised segmentation loss recipe
pub trait SegLoss: Send + Sync {
    /// Recipe name used in log records
    fn name(&self) -> &'static str;

    /// Compute `(loss, dloss/dlogits)` for `[B, K, H, W]` logits against
    /// `[B, H, W]` integer targets
    fn forward(&self, logits: &Array4<f32>, targets: &Array3<i64>) -> (f32, Array4<f32>);
}

/// Per-task supervised recipe selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegLossConfig {
    CrossEntropy {
        #[serde(default = "default_scale")]
        scale_factor: f32,
    },
    UnbiasedCrossEntropy {
        #[serde(default = "default_scale")]
        scale_factor: f32,
    },
}

fn default_scale() -> f32 {
    1.0
}

impl SegLossConfig {
    /// Build the recipe; `num_old_classes` parameterizes the unbiased
    /// redistribution set (zero on the first task).
    pub fn build(&self, ignore_index: i64, num_old_classes: usize) -> Box<dyn SegLoss> {
        match *self {
            SegLossConfig::CrossEntropy { scale_factor } => {
                Box::new(CrossEntropyLoss::new(scale_factor, ignore_index))
            }
            SegLossConfig::UnbiasedCrossEntropy { scale_factor } => Box::new(
                UnbiasedCrossEntropyLoss::new(scale_factor, ignore_index, num_old_classes),
            ),
        }
    }
}

/// Per-pixel softmax over the channel axis, max-subtracted for stability
pub(crate) fn softmax_channels(logits: &Array4<f32>) -> Array4<f32> {
    let (b, k, h, w) = logits.dim();
    let mut probs = logits.clone();
    for bi in 0..b {
        for y in 0..h {
            for x in 0..w {
                let mut max_val = f32::NEG_INFINITY;
                for ki in 0..k {
                    max_val = max_val.max(probs[[bi, ki, y, x]]);
                }
                let mut sum = 0.0;
                for ki in 0..k {
                    let e = (probs[[bi, ki, y, x]] - max_val).exp();
                    probs[[bi, ki, y, x]] = e;
                    sum += e;
                }
                for ki in 0..k {
                    probs[[bi, ki, y, x]] /= sum;
                }
            }
        }
    }
    probs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn test_softmax_channels_sums_to_one() {
        let logits = Array4::from_shape_fn((2, 3, 2, 2), |(b, k, y, x)| {
            (b + k * 2 + y + x) as f32 * 0.7 - 1.0
        });
        let probs = softmax_channels(&logits);
        for b in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    let sum: f32 = (0..3).map(|k| probs[[b, k, y, x]]).sum();
                    assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_softmax_channels_stable_for_large_logits() {
        let mut logits = Array4::<f32>::zeros((1, 2, 1, 1));
        logits[[0, 0, 0, 0]] = 1000.0;
        logits[[0, 1, 0, 0]] = 999.0;
        let probs = softmax_channels(&logits);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_config_builds_named_recipes() {
        let ce = SegLossConfig::CrossEntropy { scale_factor: 1.0 }.build(255, 0);
        assert_eq!(ce.name(), "cross_entropy");
        let ubce = SegLossConfig::UnbiasedCrossEntropy { scale_factor: 1.0 }.build(255, 2);
        assert_eq!(ubce.name(), "unbiased_cross_entropy");
    }
}
