//! Unbiased cross entropy, the "continual" recipe
//!
//! In incremental tasks the ground truth only labels background plus the
//! task's new classes; pixels of previously learned classes are folded into
//! background. Plain cross entropy would push those pixels toward the
//! background channel and erase old knowledge. The unbiased variant scores
//! a background pixel by the aggregated probability of {background, old
//! classes}, so predicting an old class there is never penalized.
//!
//! The redistribution set is derived from `num_old_classes`; other
//! redistribution policies plug in as separate `SegLoss` implementations.

use ndarray::{Array3, Array4};

use super::{softmax_channels, SegLoss};

/// Mean unbiased cross entropy over non-ignored pixels
#[derive(Debug, Clone)]
pub struct UnbiasedCrossEntropyLoss {
    scale_factor: f32,
    ignore_index: i64,
    num_old_classes: usize,
}

impl UnbiasedCrossEntropyLoss {
    /// Create the recipe; `num_old_classes` counts background plus every
    /// class learned in earlier tasks.
    pub fn new(scale_factor: f32, ignore_index: i64, num_old_classes: usize) -> Self {
        Self {
            scale_factor,
            ignore_index,
            num_old_classes,
        }
    }
}

impl SegLoss for UnbiasedCrossEntropyLoss {
    fn name(&self) -> &'static str {
        "unbiased_cross_entropy"
    }

    fn forward(&self, logits: &Array4<f32>, targets: &Array3<i64>) -> (f32, Array4<f32>) {
        let (b, k, h, w) = logits.dim();
        assert_eq!(targets.dim(), (b, h, w), "target shape mismatch");
        let old = self.num_old_classes.min(k);

        let probs = softmax_channels(logits);
        let mut grad = Array4::<f32>::zeros((b, k, h, w));
        let mut loss = 0.0_f32;
        let mut valid = 0_usize;

        for bi in 0..b {
            for y in 0..h {
                for x in 0..w {
                    let t = targets[[bi, y, x]];
                    if t == self.ignore_index {
                        continue;
                    }
                    let t = t as usize;
                    assert!(t < k, "target class {t} out of range for {k} channels");
                    valid += 1;

                    if t == 0 && old > 0 {
                        // Aggregate mass over background and old classes
                        let mut q = 0.0;
                        for ki in 0..old {
                            q += probs[[bi, ki, y, x]];
                        }
                        let q = q.max(1e-10);
                        loss -= q.ln();
                        for ki in 0..k {
                            let p = probs[[bi, ki, y, x]];
                            let member = if ki < old { p / q } else { 0.0 };
                            grad[[bi, ki, y, x]] = p - member;
                        }
                    } else {
                        loss -= probs[[bi, t, y, x]].max(1e-10).ln();
                        for ki in 0..k {
                            let indicator = if ki == t { 1.0 } else { 0.0 };
                            grad[[bi, ki, y, x]] = probs[[bi, ki, y, x]] - indicator;
                        }
                    }
                }
            }
        }

        if valid == 0 {
            return (0.0, grad);
        }
        let norm = self.scale_factor / valid as f32;
        grad.mapv_inplace(|g| g * norm);
        (loss * norm, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::CrossEntropyLoss;
    use approx::assert_relative_eq;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_matches_plain_ce_with_no_old_classes() {
        let logits = Array4::from_shape_fn((1, 3, 2, 2), |(_, k, y, x)| (k * 2 + y + x) as f32 * 0.4);
        let targets = Array3::<i64>::from_shape_fn((1, 2, 2), |(_, y, x)| ((y + x) % 3) as i64);
        let (l_ub, g_ub) = UnbiasedCrossEntropyLoss::new(1.0, 255, 0).forward(&logits, &targets);
        let (l_ce, g_ce) = CrossEntropyLoss::new(1.0, 255).forward(&logits, &targets);
        assert_relative_eq!(l_ub, l_ce, epsilon = 1e-6);
        assert_relative_eq!(g_ub[[0, 1, 0, 1]], g_ce[[0, 1, 0, 1]], epsilon = 1e-6);
    }

    #[test]
    fn test_old_class_prediction_not_penalized_on_background() {
        // Model confidently predicts old class 1 on a background-labeled pixel
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 1));
        logits[[0, 1, 0, 0]] = 10.0;
        let targets = Array3::<i64>::zeros((1, 1, 1));

        let (l_ub, _) = UnbiasedCrossEntropyLoss::new(1.0, 255, 2).forward(&logits, &targets);
        let (l_ce, _) = CrossEntropyLoss::new(1.0, 255).forward(&logits, &targets);
        assert!(l_ub < 1e-3, "unbiased loss should be near zero, got {l_ub}");
        assert!(l_ce > 5.0, "plain CE should penalize heavily, got {l_ce}");
    }

    #[test]
    fn test_new_class_pixels_use_standard_ce() {
        let logits = Array4::from_shape_fn((1, 3, 1, 1), |(_, k, _, _)| k as f32);
        let targets = Array3::<i64>::from_elem((1, 1, 1), 2);
        let (l_ub, g_ub) = UnbiasedCrossEntropyLoss::new(1.0, 255, 2).forward(&logits, &targets);
        let (l_ce, g_ce) = CrossEntropyLoss::new(1.0, 255).forward(&logits, &targets);
        assert_relative_eq!(l_ub, l_ce, epsilon = 1e-6);
        assert_relative_eq!(g_ub[[0, 2, 0, 0]], g_ce[[0, 2, 0, 0]], epsilon = 1e-6);
    }

    #[test]
    fn test_background_gradient_sums_to_zero() {
        let logits = Array4::from_shape_fn((1, 4, 1, 1), |(_, k, _, _)| k as f32 * 0.5);
        let targets = Array3::<i64>::zeros((1, 1, 1));
        let (_, grad) = UnbiasedCrossEntropyLoss::new(1.0, 255, 2).forward(&logits, &targets);
        let sum: f32 = (0..4).map(|k| grad[[0, k, 0, 0]]).sum();
        assert_relative_eq!(sum, 0.0, epsilon = 1e-6);
    }
}
