//! Loss coordination across first and continual tasks

use std::collections::BTreeMap;

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

use super::{DistillationLoss, SegLoss};
use crate::models::Segmentor;
use crate::{Error, Result};

/// Distillation parameters, fixed per experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillConfig {
    #[serde(default = "default_kd_scale")]
    pub scale_factor: f32,
    #[serde(default = "default_kd_alpha")]
    pub alpha: f32,
}

fn default_kd_scale() -> f32 {
    10.0
}

fn default_kd_alpha() -> f32 {
    1.0
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_kd_scale(),
            alpha: default_kd_alpha(),
        }
    }
}

/// Whether a task has a frozen predecessor to distill from
///
/// The history segmentor is created at task start from the previous task's
/// latest checkpoint, frozen, kept in inference mode, and discarded when
/// the task ends.
pub enum ModelContext {
    /// First task: supervised loss only
    FirstTask,
    /// Later task: supervised loss plus distillation against the snapshot
    ContinualTask { history: Box<dyn Segmentor> },
}

impl ModelContext {
    /// The frozen history model, if any
    pub fn history(&self) -> Option<&dyn Segmentor> {
        match self {
            ModelContext::FirstTask => None,
            ModelContext::ContinualTask { history } => Some(history.as_ref()),
        }
    }
}

/// Combined loss for one training batch
#[derive(Debug)]
pub struct LossOutput {
    /// Total scalar used for the backward pass
    pub total: f32,
    /// Gradient with respect to the current segmentor's logits
    pub grad_logits: Array4<f32>,
    /// Named components for the log record
    pub components: BTreeMap<String, f32>,
}

/// Computes supervised + distillation loss, dispatching on the context
pub struct LossCoordinator {
    seg_loss: Box<dyn SegLoss>,
    distill: DistillationLoss,
}

impl LossCoordinator {
    /// Build from the task's supervised recipe and the experiment's
    /// distillation parameters
    pub fn new(seg_loss: Box<dyn SegLoss>, distill: &DistillConfig) -> Self {
        Self {
            seg_loss,
            distill: DistillationLoss::new(distill.scale_factor, distill.alpha),
        }
    }

    /// Compute the batch loss and its logit gradient; no model state is
    /// touched beyond the history forward pass.
    pub fn compute(
        &self,
        context: &ModelContext,
        images: &Array4<f32>,
        logits: &Array4<f32>,
        targets: &Array3<i64>,
    ) -> Result<LossOutput> {
        let (seg, mut grad) = self.seg_loss.forward(logits, targets);
        let mut components = BTreeMap::new();
        components.insert("loss_seg".to_string(), seg);
        let mut total = seg;

        if let Some(history) = context.history() {
            let num_classes = logits.dim().1;
            if history.num_classes() > num_classes {
                return Err(Error::Config(format!(
                    "history model has {} classes, current model only {}",
                    history.num_classes(),
                    num_classes
                )));
            }
            let history_logits = history.forward(images);
            let (kd, kd_grad) = self.distill.forward(logits, &history_logits);
            grad += &kd_grad;
            total += kd;
            components.insert("loss_kd".to_string(), kd);
        }

        components.insert("loss_total".to_string(), total);
        Ok(LossOutput {
            total,
            grad_logits: grad,
            components,
        })
    }
}
