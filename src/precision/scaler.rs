//! Gradient scaler for mixed-precision training

use serde::{Deserialize, Serialize};

/// Default number of successful steps before the loss scale is increased
const DEFAULT_SCALE_GROWTH_INTERVAL: usize = 2000;

/// Gradient scaler for mixed-precision training
///
/// Handles loss scaling to prevent gradient underflow in reduced-precision
/// training. The scale adapts downward on overflow and grows after an
/// interval of successful steps.
#[derive(Debug, Clone)]
pub struct GradScaler {
    /// Current loss scale
    scale: f32,
    /// Growth factor
    growth_factor: f32,
    /// Backoff factor
    backoff_factor: f32,
    /// Successful steps before growth
    growth_interval: usize,
    /// Steps since last growth
    steps_since_growth: usize,
    /// Whether dynamic scaling is enabled
    dynamic: bool,
    /// Number of overflows encountered
    overflow_count: usize,
    /// Number of successful steps
    successful_steps: usize,
}

/// Serializable scaler state, part of every checkpoint bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradScalerState {
    pub scale: f32,
    pub steps_since_growth: usize,
    pub overflow_count: usize,
    pub successful_steps: usize,
}

impl GradScaler {
    /// Create a dynamic scaler with the given initial scale
    pub fn new(initial_scale: f32) -> Self {
        Self {
            scale: initial_scale,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: DEFAULT_SCALE_GROWTH_INTERVAL,
            steps_since_growth: 0,
            dynamic: true,
            overflow_count: 0,
            successful_steps: 0,
        }
    }

    /// Create a static scaler; the scale never adapts
    pub fn fixed(scale: f32) -> Self {
        let mut scaler = Self::new(scale);
        scaler.dynamic = false;
        scaler
    }

    /// Override the growth interval
    pub fn with_growth_interval(mut self, interval: usize) -> Self {
        self.growth_interval = interval;
        self
    }

    /// Get current scale
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Scale a loss value
    pub fn scale_loss(&self, loss: f32) -> f32 {
        loss * self.scale
    }

    /// Unscale gradients in place and check for overflow
    ///
    /// Returns true if gradients are valid (no overflow), false otherwise.
    pub fn unscale_and_check(&self, grads: &mut [f32]) -> bool {
        let inv_scale = 1.0 / self.scale;
        let mut has_overflow = false;
        for grad in grads.iter_mut() {
            *grad *= inv_scale;
            if !grad.is_finite() {
                has_overflow = true;
            }
        }
        !has_overflow
    }

    /// Update the scale after a step; pass `true` if gradients were valid
    pub fn update(&mut self, grads_valid: bool) {
        if !self.dynamic {
            return;
        }
        if grads_valid {
            self.successful_steps += 1;
            self.steps_since_growth += 1;
            if self.steps_since_growth >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.steps_since_growth = 0;
            }
        } else {
            self.overflow_count += 1;
            self.scale *= self.backoff_factor;
            self.steps_since_growth = 0;
            self.scale = self.scale.max(1.0);
        }
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Get successful step count
    pub fn successful_steps(&self) -> usize {
        self.successful_steps
    }

    /// Snapshot the adaptive state
    pub fn state(&self) -> GradScalerState {
        GradScalerState {
            scale: self.scale,
            steps_since_growth: self.steps_since_growth,
            overflow_count: self.overflow_count,
            successful_steps: self.successful_steps,
        }
    }

    /// Restore a snapshot taken by `state`
    pub fn load_state(&mut self, state: &GradScalerState) {
        self.scale = state.scale;
        self.steps_since_growth = state.steps_since_growth;
        self.overflow_count = state.overflow_count;
        self.successful_steps = state.successful_steps;
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(65536.0)
    }
}
