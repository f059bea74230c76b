//! Stochastic Gradient Descent optimizer

use ndarray::Array1;

use super::{Optimizer, OptimizerState};
use crate::models::Param;
use crate::{Error, Result};

/// SGD with optional momentum and weight decay
pub struct SGD {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: Vec<Option<Array1<f32>>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            velocities: Vec::new(),
        }
    }

    fn ensure_velocities(&mut self, params: &[Param]) {
        if self.velocities.len() != params.len() {
            self.velocities = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [Param]) {
        self.ensure_velocities(params);

        for (i, param) in params.iter_mut().enumerate() {
            if !param.requires_grad() {
                continue;
            }
            let Some(grad) = param.grad() else { continue };

            let mut update = grad.clone();
            if self.weight_decay > 0.0 {
                update += &(param.data() * self.weight_decay);
            }

            if self.momentum > 0.0 {
                // v = momentum * v + update; step along v
                let velocity = match self.velocities[i].take() {
                    Some(v) => v * self.momentum + &update,
                    None => update.clone(),
                };
                *param.data_mut() = param.data() - &(&velocity * self.lr);
                self.velocities[i] = Some(velocity);
            } else {
                *param.data_mut() = param.data() - &(&update * self.lr);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::SGD {
            lr: self.lr,
            velocities: self
                .velocities
                .iter()
                .map(|v| v.as_ref().map(|a| a.to_vec()))
                .collect(),
        }
    }

    fn load_state(&mut self, state: &OptimizerState) -> Result<()> {
        let OptimizerState::SGD { lr, velocities } = state;
        if !self.velocities.is_empty() && self.velocities.len() != velocities.len() {
            return Err(Error::Resume(format!(
                "optimizer state has {} velocity buffers, expected {}",
                velocities.len(),
                self.velocities.len()
            )));
        }
        self.lr = *lr;
        self.velocities = velocities
            .iter()
            .map(|v| v.as_ref().map(|d| Array1::from_vec(d.clone())))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn param(data: &[f32], grad: &[f32]) -> Param {
        let mut p = Param::new("w", vec![data.len()], arr1(data));
        p.accumulate_grad(&arr1(grad));
        p
    }

    #[test]
    fn test_plain_sgd_step() {
        let mut opt = SGD::new(0.1, 0.0, 0.0);
        let mut params = vec![param(&[1.0, 2.0], &[1.0, 1.0])];
        opt.step(&mut params);
        assert_relative_eq!(params[0].data()[0], 0.9);
        assert_relative_eq!(params[0].data()[1], 1.9);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut opt = SGD::new(0.1, 0.5, 0.0);
        let mut params = vec![param(&[1.0], &[1.0])];
        opt.step(&mut params);
        assert_relative_eq!(params[0].data()[0], 0.9);

        // Same gradient again: v = 0.5*1 + 1 = 1.5
        params[0].zero_grad();
        params[0].accumulate_grad(&arr1(&[1.0]));
        opt.step(&mut params);
        assert_relative_eq!(params[0].data()[0], 0.9 - 0.15);
    }

    #[test]
    fn test_weight_decay_shrinks_weights() {
        let mut opt = SGD::new(0.1, 0.0, 0.1);
        let mut params = vec![param(&[1.0], &[0.0])];
        opt.step(&mut params);
        // update = grad + wd * w = 0.1; step = 1.0 - 0.1*0.1
        assert_relative_eq!(params[0].data()[0], 0.99);
    }

    #[test]
    fn test_frozen_params_are_skipped() {
        let mut opt = SGD::new(0.1, 0.0, 0.0);
        let mut p = param(&[1.0], &[1.0]);
        p.set_requires_grad(false);
        let mut params = vec![p];
        opt.step(&mut params);
        assert_relative_eq!(params[0].data()[0], 1.0);
    }

    #[test]
    fn test_state_roundtrip_reproduces_trajectory() {
        let mut opt = SGD::new(0.1, 0.9, 0.0);
        let mut params = vec![param(&[1.0], &[1.0])];
        opt.step(&mut params);

        // Snapshot, then continue two different copies identically
        let state = opt.state();
        let weights = params[0].data().to_vec();

        let mut resumed = SGD::new(0.1, 0.9, 0.0);
        resumed.load_state(&state).unwrap();
        let mut resumed_params = vec![Param::new("w", vec![1], arr1(&weights))];

        for _ in 0..3 {
            params[0].zero_grad();
            params[0].accumulate_grad(&arr1(&[0.5]));
            opt.step(&mut params);

            resumed_params[0].zero_grad();
            resumed_params[0].accumulate_grad(&arr1(&[0.5]));
            resumed.step(&mut resumed_params);
        }
        assert_relative_eq!(params[0].data()[0], resumed_params[0].data()[0]);
    }
}
