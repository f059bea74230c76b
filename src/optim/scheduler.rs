//! Polynomial-decay learning-rate scheduler
//!
//! `lr = base_lr * (1 - cur_iter / max_iters)^power`, floored at `min_lr`.
//! The rate is a pure function of `cur_iter` given fixed policy parameters,
//! so restoring the counters alone reproduces the exact future lr sequence.

use serde::{Deserialize, Serialize};

use super::Optimizer;
use crate::models::Param;
use crate::precision::{MixedPrecision, StepOutcome};

/// Per-task scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Epochs to train this task
    pub max_epochs: usize,
    /// Base learning rate
    pub lr: f32,
    /// Learning-rate floor
    #[serde(default)]
    pub min_lr: f32,
    /// Polynomial decay exponent
    #[serde(default = "default_power")]
    pub power: f32,
}

fn default_power() -> f32 {
    0.9
}

/// Resumable counter state, part of every checkpoint bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub cur_epoch: usize,
    pub cur_iter: usize,
    pub lr: f32,
}

/// Epoch/iteration counters plus the polynomial lr policy
#[derive(Debug, Clone)]
pub struct PolyScheduler {
    base_lr: f32,
    min_lr: f32,
    power: f32,
    /// Last completed epoch, 1-based; 0 before training starts
    pub cur_epoch: usize,
    pub max_epochs: usize,
    pub cur_iter: usize,
    pub max_iters: usize,
    lr: f32,
}

impl PolyScheduler {
    /// Build from a per-task configuration and the loader's epoch length
    pub fn new(config: &SchedulerConfig, iters_per_epoch: usize) -> Self {
        Self {
            base_lr: config.lr,
            min_lr: config.min_lr,
            power: config.power,
            cur_epoch: 0,
            max_epochs: config.max_epochs,
            cur_iter: 0,
            max_iters: config.max_epochs * iters_per_epoch,
            lr: config.lr,
        }
    }

    /// The lr the policy yields at a given iteration
    pub fn lr_at(&self, iter: usize) -> f32 {
        let remaining = 1.0 - (iter.min(self.max_iters) as f32 / self.max_iters.max(1) as f32);
        (self.base_lr * remaining.powf(self.power)).max(self.min_lr)
    }

    /// Current learning rate
    pub fn lr(&self) -> f32 {
        self.lr
    }

    /// Clear all parameter gradients
    pub fn zero_grad(&self, params: &mut [Param]) {
        for p in params.iter_mut() {
            p.zero_grad();
        }
    }

    /// One optimization step: recompute lr, apply it, delegate gradient
    /// application to the precision strategy, advance `cur_iter`.
    ///
    /// `cur_iter` advances exactly once per call, including skipped
    /// (overflowed) steps, matching the policy's pure-function contract.
    pub fn step(
        &mut self,
        optimizer: &mut dyn Optimizer,
        params: &mut [Param],
        precision: &mut MixedPrecision,
    ) -> StepOutcome {
        self.lr = self.lr_at(self.cur_iter);
        optimizer.set_lr(self.lr);
        let outcome = precision.step(optimizer, params);
        self.cur_iter += 1;
        outcome
    }

    /// Snapshot the counters for checkpointing
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cur_epoch: self.cur_epoch,
            cur_iter: self.cur_iter,
            lr: self.lr,
        }
    }

    /// Restore counters from a checkpoint
    pub fn restore(&mut self, snapshot: &SchedulerSnapshot) {
        self.cur_epoch = snapshot.cur_epoch;
        self.cur_iter = snapshot.cur_iter;
        self.lr = snapshot.lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::SGD;
    use crate::precision::{MixedPrecision, PrecisionConfig};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn scheduler(lr: f32, power: f32, max_epochs: usize, ipe: usize) -> PolyScheduler {
        PolyScheduler::new(
            &SchedulerConfig {
                max_epochs,
                lr,
                min_lr: 0.0,
                power,
            },
            ipe,
        )
    }

    #[test]
    fn test_lr_starts_at_base_and_ends_at_min() {
        let s = scheduler(0.01, 0.9, 10, 5);
        assert_relative_eq!(s.lr_at(0), 0.01);
        assert_relative_eq!(s.lr_at(50), 0.0);
    }

    #[test]
    fn test_min_lr_floor() {
        let s = PolyScheduler::new(
            &SchedulerConfig {
                max_epochs: 2,
                lr: 0.1,
                min_lr: 0.01,
                power: 0.9,
            },
            10,
        );
        assert_relative_eq!(s.lr_at(20), 0.01);
        assert!(s.lr_at(19) >= 0.01);
    }

    #[test]
    fn test_step_advances_iter_and_applies_lr() {
        let mut s = scheduler(0.1, 1.0, 1, 2);
        let mut opt = SGD::new(0.1, 0.0, 0.0);
        let mut precision = MixedPrecision::from_config(&PrecisionConfig {
            initial_scale: 1.0,
            ..Default::default()
        });
        let mut params: Vec<crate::models::Param> = Vec::new();

        assert_eq!(s.cur_iter, 0);
        s.step(&mut opt, &mut params, &mut precision);
        assert_eq!(s.cur_iter, 1);
        assert_relative_eq!(s.lr(), 0.1);
        // Second step sees iter 1 of 2: lr = 0.1 * 0.5
        s.step(&mut opt, &mut params, &mut precision);
        assert_relative_eq!(s.lr(), 0.05);
        assert_relative_eq!(opt.lr(), 0.05);
    }

    #[test]
    fn test_restore_reproduces_future_sequence() {
        let s = scheduler(0.02, 0.9, 4, 25);
        let mut restored = scheduler(0.02, 0.9, 4, 25);
        restored.restore(&SchedulerSnapshot {
            cur_epoch: 2,
            cur_iter: 50,
            lr: s.lr_at(49),
        });
        for offset in 0..50 {
            assert_relative_eq!(restored.lr_at(50 + offset), s.lr_at(50 + offset));
        }
    }

    proptest! {
        #[test]
        fn prop_poly_lr_monotonically_non_increasing(
            base_lr in 1e-5_f32..1.0,
            power in 0.1_f32..3.0,
            max_iters in 1_usize..500,
        ) {
            let s = PolyScheduler::new(
                &SchedulerConfig { max_epochs: 1, lr: base_lr, min_lr: 0.0, power },
                max_iters,
            );
            let mut prev = s.lr_at(0);
            for iter in 1..=max_iters {
                let cur = s.lr_at(iter);
                prop_assert!(cur <= prev + 1e-7, "lr increased at iter {}: {} -> {}", iter, prev, cur);
                prev = cur;
            }
        }

        #[test]
        fn prop_poly_lr_hits_min_at_max_iters(
            base_lr in 1e-5_f32..1.0,
            min_lr in 0.0_f32..1e-4,
            power in 0.1_f32..3.0,
            max_iters in 1_usize..500,
        ) {
            let s = PolyScheduler::new(
                &SchedulerConfig { max_epochs: 1, lr: base_lr, min_lr, power },
                max_iters,
            );
            prop_assert!((s.lr_at(max_iters) - min_lr).abs() <= 1e-6);
        }
    }
}
