//! Logit distillation against the frozen history segmentor
//!
//! Acts only on the channel prefix shared with the history model; newly
//! added classifier channels receive no distillation gradient.

use ndarray::{s, Array4};

use super::softmax_channels;

/// Soft-target cross entropy between current and history logits
#[derive(Debug, Clone)]
pub struct DistillationLoss {
    /// Multiplier applied to the raw soft-target cross entropy
    pub scale_factor: f32,
    /// Weight of the distillation term in the total loss
    pub alpha: f32,
}

impl DistillationLoss {
    /// Create the loss; `alpha` weighs the term against the supervised loss
    pub fn new(scale_factor: f32, alpha: f32) -> Self {
        assert!(scale_factor > 0.0, "scale_factor must be positive");
        assert!(alpha >= 0.0, "alpha must be non-negative");
        Self {
            scale_factor,
            alpha,
        }
    }

    /// Compute the weighted distillation term and its gradient on the
    /// current logits
    ///
    /// `current` is `[B, K, H, W]`, `history` is `[B, Kh, H, W]` with
    /// `Kh <= K`; the caller validates the channel relationship. The
    /// returned gradient is zero on channels `Kh..K`.
    pub fn forward(&self, current: &Array4<f32>, history: &Array4<f32>) -> (f32, Array4<f32>) {
        let (b, k, h, w) = current.dim();
        let (hb, kh, hh, hw) = history.dim();
        assert_eq!((b, h, w), (hb, hh, hw), "history batch shape mismatch");
        assert!(kh <= k, "history channels exceed current channels");

        let shared = current.slice(s![.., ..kh, .., ..]).to_owned();
        let student = softmax_channels(&shared);
        let teacher = softmax_channels(history);

        let npixels = (b * h * w) as f32;
        let weight = self.alpha * self.scale_factor;
        let mut loss = 0.0_f32;
        let mut grad = Array4::<f32>::zeros((b, k, h, w));
        for bi in 0..b {
            for y in 0..h {
                for x in 0..w {
                    for ki in 0..kh {
                        let q = teacher[[bi, ki, y, x]];
                        let p = student[[bi, ki, y, x]];
                        loss -= q * p.max(1e-10).ln();
                        grad[[bi, ki, y, x]] = (p - q) * weight / npixels;
                    }
                }
            }
        }
        (loss * weight / npixels, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array4;

    #[test]
    fn test_identical_logits_reach_entropy_floor() {
        // Soft-target CE bottoms out at the teacher's entropy, and the
        // gradient vanishes there
        let logits = Array4::from_shape_fn((1, 2, 2, 2), |(_, k, y, x)| (k + y + x) as f32 * 0.3);
        let kd = DistillationLoss::new(1.0, 1.0);
        let (_, grad) = kd.forward(&logits, &logits);
        for g in grad.iter() {
            assert_relative_eq!(*g, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_divergent_logits_give_positive_gradient_norm() {
        let current = Array4::from_shape_fn((1, 3, 1, 1), |(_, k, _, _)| k as f32);
        let history = Array4::from_shape_fn((1, 2, 1, 1), |(_, k, _, _)| (1 - k) as f32 * 2.0);
        let kd = DistillationLoss::new(1.0, 1.0);
        let (loss, grad) = kd.forward(&current, &history);
        assert!(loss > 0.0);
        assert!(grad.iter().any(|g| g.abs() > 0.0));
    }

    #[test]
    fn test_new_channels_receive_no_gradient() {
        let current = Array4::from_shape_fn((1, 4, 2, 2), |(_, k, y, x)| (k + y * x) as f32 * 0.5);
        let history = Array4::from_shape_fn((1, 2, 2, 2), |(_, k, y, x)| (k + y + x) as f32 * 0.2);
        let (_, grad) = DistillationLoss::new(10.0, 1.0).forward(&current, &history);
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(grad[[0, 2, y, x]], 0.0);
                assert_eq!(grad[[0, 3, y, x]], 0.0);
            }
        }
    }

    #[test]
    fn test_scale_and_alpha_weigh_the_term() {
        let current = Array4::from_shape_fn((1, 2, 1, 1), |(_, k, _, _)| k as f32);
        let history = Array4::from_shape_fn((1, 2, 1, 1), |(_, k, _, _)| (1 - k) as f32);
        let (base, _) = DistillationLoss::new(1.0, 1.0).forward(&current, &history);
        let (scaled, _) = DistillationLoss::new(10.0, 0.5).forward(&current, &history);
        assert_relative_eq!(scaled, base * 5.0, epsilon = 1e-5);
    }

    #[test]
    #[should_panic(expected = "history channels exceed")]
    fn test_history_wider_than_current_panics() {
        let current = Array4::<f32>::zeros((1, 2, 1, 1));
        let history = Array4::<f32>::zeros((1, 3, 1, 1));
        DistillationLoss::new(1.0, 1.0).forward(&current, &history);
    }
}
