//! Segmentation quality metrics
//!
//! - Confusion-matrix accumulation over predicted label maps
//! - Per-class IoU, mean IoU, and overall pixel accuracy
//! - Cross-worker synchronization before readout

use std::collections::BTreeMap;

use ndarray::Array3;

use crate::error::Result;
use crate::parallel::Collective;

/// Metric name to value, ordered for stable serialization
pub type EvalResults = BTreeMap<String, f64>;

/// Accumulates a `K x K` confusion matrix over whole-image predictions.
///
/// Rows index ground truth, columns index the prediction. Counts are held
/// as `u64` so they can ride the integer all-reduce unchanged.
pub struct SegmentationEvaluator {
    num_classes: usize,
    ignore_index: i64,
    confusion: Vec<u64>,
}

impl SegmentationEvaluator {
    pub fn new(num_classes: usize, ignore_index: i64) -> Self {
        Self {
            num_classes,
            ignore_index,
            confusion: vec![0; num_classes * num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Fold one batch of predictions into the confusion matrix.
    ///
    /// Pixels labeled with the ignore index are skipped; predictions
    /// outside `[0, num_classes)` are skipped as well.
    pub fn update(&mut self, preds: &Array3<i64>, targets: &Array3<i64>) {
        debug_assert_eq!(preds.dim(), targets.dim());
        let k = self.num_classes as i64;
        for (&p, &t) in preds.iter().zip(targets.iter()) {
            if t == self.ignore_index || t < 0 || t >= k {
                continue;
            }
            if p < 0 || p >= k {
                continue;
            }
            self.confusion[t as usize * self.num_classes + p as usize] += 1;
        }
    }

    /// Sum counts across every worker so readout is identical on all ranks
    pub fn synchronize(&mut self, comm: &dyn Collective) -> Result<()> {
        comm.all_reduce_sum_u64(&mut self.confusion)
    }

    /// Compute metrics from the accumulated counts.
    ///
    /// Classes with an empty union report an IoU of zero and still count
    /// toward the mean, so a model that never sees a class is penalized
    /// rather than silently excused.
    pub fn evaluate(&self) -> EvalResults {
        let k = self.num_classes;
        let mut results = EvalResults::new();
        let mut iou_sum = 0.0;
        let mut correct = 0u64;
        let mut total = 0u64;
        for i in 0..k {
            let tp = self.confusion[i * k + i];
            let gt_row: u64 = (0..k).map(|j| self.confusion[i * k + j]).sum();
            let pred_col: u64 = (0..k).map(|j| self.confusion[j * k + i]).sum();
            let union = gt_row + pred_col - tp;
            let iou = if union == 0 {
                0.0
            } else {
                tp as f64 / union as f64
            };
            results.insert(format!("iou_class_{i}"), iou);
            iou_sum += iou;
            correct += tp;
            total += gt_row;
        }
        results.insert("mean_iou".to_string(), iou_sum / k as f64);
        let accuracy = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };
        results.insert("accuracy".to_string(), accuracy);
        results
    }

    pub fn reset(&mut self) {
        self.confusion.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SingleProcess;
    use approx::assert_relative_eq;
    use ndarray::arr3;

    #[test]
    fn test_perfect_prediction_scores_one() {
        let mut ev = SegmentationEvaluator::new(3, 255);
        let t = arr3(&[[[0i64, 1, 2], [2, 1, 0]]]);
        ev.update(&t.clone(), &t);
        let r = ev.evaluate();
        assert_relative_eq!(r["mean_iou"], 1.0);
        assert_relative_eq!(r["accuracy"], 1.0);
        assert_relative_eq!(r["iou_class_1"], 1.0);
    }

    #[test]
    fn test_ignore_index_pixels_are_skipped() {
        let mut ev = SegmentationEvaluator::new(2, 255);
        let preds = arr3(&[[[0i64, 1]]]);
        let targets = arr3(&[[[255i64, 1]]]);
        ev.update(&preds, &targets);
        let r = ev.evaluate();
        assert_relative_eq!(r["accuracy"], 1.0);
        assert_relative_eq!(r["iou_class_1"], 1.0);
        // Class 0 never appeared: empty union scores zero
        assert_relative_eq!(r["iou_class_0"], 0.0);
        assert_relative_eq!(r["mean_iou"], 0.5);
    }

    #[test]
    fn test_partial_overlap_iou() {
        let mut ev = SegmentationEvaluator::new(2, 255);
        // gt: [0 0 1 1], pred: [0 1 1 1] -> class0 tp=1 union=2, class1 tp=2 union=3
        let preds = arr3(&[[[0i64, 1, 1, 1]]]);
        let targets = arr3(&[[[0i64, 0, 1, 1]]]);
        ev.update(&preds, &targets);
        let r = ev.evaluate();
        assert_relative_eq!(r["iou_class_0"], 0.5);
        assert_relative_eq!(r["iou_class_1"], 2.0 / 3.0);
        assert_relative_eq!(r["accuracy"], 0.75);
    }

    #[test]
    fn test_synchronize_single_process_is_identity() {
        let mut ev = SegmentationEvaluator::new(2, 255);
        let preds = arr3(&[[[0i64, 1]]]);
        ev.update(&preds, &preds);
        let before = ev.confusion.clone();
        ev.synchronize(&SingleProcess).unwrap();
        assert_eq!(ev.confusion, before);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut ev = SegmentationEvaluator::new(2, 255);
        let preds = arr3(&[[[0i64, 1]]]);
        ev.update(&preds, &preds);
        ev.reset();
        assert!(ev.confusion.iter().all(|&c| c == 0));
    }
}
