//! Mixed-precision step strategy
//!
//! Two interchangeable backends behind one backward/step contract, chosen
//! once at construction from configuration:
//!
//! - `GradScaling`: dynamic loss scale; gradients are unscaled and checked
//!   before the optimizer step, the step is skipped on overflow and the
//!   scale adapts (backoff on overflow, growth after an interval).
//! - `LossScaling`: legacy static scale; the loss is explicitly scaled,
//!   gradients are unscaled before the step, the scale itself never moves.
//!
//! Strategy state participates in checkpointing via `state`/`load_state`.

mod convert;
mod scaler;

pub use convert::{bf16_to_f32, f32_to_bf16, round_trip_bf16};
pub use scaler::{GradScaler, GradScalerState};

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::models::{Param, Segmentor};
use crate::optim::Optimizer;

/// Which backend a run uses; fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionBackend {
    /// Dynamic gradient scaling with overflow skipping
    #[default]
    GradScaling,
    /// Static loss scaling, no adaptation
    LossScaling,
}

/// Precision strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecisionConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: PrecisionBackend,
    /// Initial (or fixed) loss scale
    #[serde(default = "default_initial_scale")]
    pub initial_scale: f32,
    /// Successful steps before the dynamic scale grows
    #[serde(default = "default_growth_interval")]
    pub growth_interval: usize,
    /// Round gradients through bf16 before the cross-worker reduction
    #[serde(default)]
    pub compress_gradient_sync: bool,
}

fn default_initial_scale() -> f32 {
    65536.0
}

fn default_growth_interval() -> usize {
    2000
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            backend: PrecisionBackend::GradScaling,
            initial_scale: default_initial_scale(),
            growth_interval: default_growth_interval(),
            compress_gradient_sync: false,
        }
    }
}

/// Checkpointable strategy state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecisionState {
    pub backend: PrecisionBackend,
    pub scaler: GradScalerState,
}

/// Outcome of one optimizer step mediated by the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Gradients were finite; the optimizer stepped
    Applied,
    /// Gradient overflow; the step was skipped, training continues
    Skipped,
}

impl StepOutcome {
    /// Whether the optimizer actually stepped
    pub fn applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }
}

/// The per-run mixed-precision strategy
#[derive(Debug)]
pub struct MixedPrecision {
    backend: PrecisionBackend,
    scaler: GradScaler,
    compress_sync: bool,
}

impl MixedPrecision {
    /// Build the strategy selected by configuration
    pub fn from_config(config: &PrecisionConfig) -> Self {
        let scaler = match config.backend {
            PrecisionBackend::GradScaling => {
                GradScaler::new(config.initial_scale).with_growth_interval(config.growth_interval)
            }
            PrecisionBackend::LossScaling => GradScaler::fixed(config.initial_scale),
        };
        Self {
            backend: config.backend,
            scaler,
            compress_sync: config.compress_gradient_sync,
        }
    }

    /// Selected backend
    pub fn backend(&self) -> PrecisionBackend {
        self.backend
    }

    /// Whether gradient synchronization rounds payloads through bf16
    pub fn compresses_sync(&self) -> bool {
        self.compress_sync
    }

    /// Current loss scale
    pub fn scale(&self) -> f32 {
        self.scaler.scale()
    }

    /// Scale the logit gradient and run the backward pass
    ///
    /// Parameter gradients come out multiplied by the loss scale; `step`
    /// unscales them before the optimizer sees them.
    pub fn scale_and_backward(
        &self,
        segmentor: &mut dyn Segmentor,
        images: &Array4<f32>,
        grad_logits: &Array4<f32>,
    ) {
        let scaled = grad_logits * self.scaler.scale();
        segmentor.backward(images, &scaled);
    }

    /// Unscale gradients, check for overflow, and step the optimizer
    ///
    /// On overflow the optimizer step is skipped; under `GradScaling` the
    /// scale also backs off. This is the single locally-recoverable fault
    /// in the system.
    pub fn step(&mut self, optimizer: &mut dyn Optimizer, params: &mut [Param]) -> StepOutcome {
        let mut valid = true;
        for param in params.iter_mut() {
            if let Some(grad) = param.grad_mut() {
                let slice = grad
                    .as_slice_mut()
                    .expect("gradient buffers are contiguous");
                if !self.scaler.unscale_and_check(slice) {
                    valid = false;
                }
            }
        }
        self.scaler.update(valid);
        if valid {
            optimizer.step(params);
            StepOutcome::Applied
        } else {
            StepOutcome::Skipped
        }
    }

    /// Snapshot for checkpointing
    pub fn state(&self) -> PrecisionState {
        PrecisionState {
            backend: self.backend,
            scaler: self.scaler.state(),
        }
    }

    /// Restore a checkpointed snapshot
    ///
    /// The backend is a static configuration choice; a bundle recorded under
    /// the other backend cannot resume this run.
    pub fn load_state(&mut self, state: &PrecisionState) -> crate::Result<()> {
        if state.backend != self.backend {
            return Err(crate::Error::Resume(format!(
                "precision backend mismatch: checkpoint {:?}, run {:?}",
                state.backend, self.backend
            )));
        }
        self.scaler.load_state(&state.scaler);
        Ok(())
    }
}
