//! Optimizers and the per-task learning-rate scheduler
//!
//! The `Optimizer` trait mirrors what the training loop needs: a step over
//! named parameters, a settable learning rate, and a serializable internal
//! state so interrupted tasks resume with identical momentum buffers.

mod scheduler;
mod sgd;

pub use scheduler::{PolyScheduler, SchedulerConfig, SchedulerSnapshot};
pub use sgd::SGD;

use serde::{Deserialize, Serialize};

use crate::models::Param;
use crate::{Error, Result};

/// Trait for optimization algorithms
pub trait Optimizer: Send {
    /// Apply accumulated gradients to the parameters
    fn step(&mut self, params: &mut [Param]);

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);

    /// Snapshot internal state for checkpointing
    fn state(&self) -> OptimizerState;

    /// Restore a snapshot taken by `state`
    fn load_state(&mut self, state: &OptimizerState) -> Result<()>;
}

/// Serializable optimizer internals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OptimizerState {
    #[serde(rename = "sgd")]
    SGD {
        lr: f32,
        velocities: Vec<Option<Vec<f32>>>,
    },
}

/// Per-task optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Momentum coefficient
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    /// L2 weight decay
    #[serde(default)]
    pub weight_decay: f32,
}

fn default_momentum() -> f32 {
    0.9
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            momentum: default_momentum(),
            weight_decay: 0.0,
        }
    }
}

/// Build the optimizer described by a per-task configuration
pub fn build_optimizer(config: &OptimizerConfig, base_lr: f32) -> Result<Box<dyn Optimizer>> {
    if !(0.0..1.0).contains(&config.momentum) {
        return Err(Error::Config(format!(
            "momentum must be in [0, 1), got {}",
            config.momentum
        )));
    }
    Ok(Box::new(SGD::new(
        base_lr,
        config.momentum,
        config.weight_decay,
    )))
}
