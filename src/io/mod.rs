//! Checkpoint persistence
//!
//! - Self-contained per-epoch bundles serialized as JSON
//! - `latest` / `best` pointer files republished atomically
//! - Per-task directories under the experiment work dir

mod store;

pub use store::{CheckpointStore, Pointer};

use serde::{Deserialize, Serialize};

use crate::models::StateDict;
use crate::optim::{OptimizerState, SchedulerSnapshot};
use crate::precision::PrecisionState;

/// Everything needed to resume mid-task training bit-for-bit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Task this bundle belongs to
    pub task_id: usize,
    /// Best evaluation score seen so far this task
    pub best_score: f64,
    /// Segmentor parameters by name
    pub segmentor: StateDict,
    pub optimizer: OptimizerState,
    pub scheduler: SchedulerSnapshot,
    pub precision: PrecisionState,
}
