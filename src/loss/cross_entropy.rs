//! Pixel-wise cross entropy, the "initial" recipe

use ndarray::{Array3, Array4};

use super::{softmax_channels, SegLoss};

/// Mean cross entropy over non-ignored pixels
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    scale_factor: f32,
    ignore_index: i64,
}

impl CrossEntropyLoss {
    /// Create the recipe
    pub fn new(scale_factor: f32, ignore_index: i64) -> Self {
        Self {
            scale_factor,
            ignore_index,
        }
    }
}

impl SegLoss for CrossEntropyLoss {
    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn forward(&self, logits: &Array4<f32>, targets: &Array3<i64>) -> (f32, Array4<f32>) {
        let (b, k, h, w) = logits.dim();
        assert_eq!(targets.dim(), (b, h, w), "target shape mismatch");

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
                    loss -= probs[[bi, t, y, x]].max(1e-10).ln();
                    for ki in 0..k {
                        let indicator = if ki == t { 1.0 } else { 0.0 };
                        grad[[bi, ki, y, x]] = probs[[bi, ki, y, x]] - indicator;
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
