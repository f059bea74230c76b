//! Experiment configuration
//!
//! - YAML-backed experiment description covering the whole task sequence
//! - Per-task components are lists indexed by task id
//! - Fatal validation before any training starts

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loss::{DistillConfig, SegLossConfig};
use crate::optim::{OptimizerConfig, SchedulerConfig};
use crate::precision::PrecisionConfig;

/// Full experiment description, usually loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Algorithm label used in logs and results
    pub algorithm: String,
    /// Incremental setting name (e.g. "offline-15-5")
    pub task_name: String,
    /// Root directory for checkpoints and logs
    pub work_dir: PathBuf,
    /// Class ids introduced per task, contiguous from zero
    pub tasks: Vec<Vec<usize>>,
    /// Combined batch size across all workers
    pub total_train_batch_size: usize,
    /// Explicit per-worker batch size; derived from the total when absent
    #[serde(default)]
    pub batch_size_per_worker: Option<usize>,
    /// Shrink the per-worker batch to fit when the split is uneven
    #[serde(default = "default_true")]
    pub auto_align_batch_size: bool,
    /// Checkpoint every N epochs
    #[serde(default = "default_interval")]
    pub save_interval_epochs: usize,
    /// Evaluate every N epochs
    #[serde(default = "default_interval")]
    pub eval_interval_epochs: usize,
    /// Emit an averaged log record every N iterations
    #[serde(default = "default_log_interval")]
    pub log_interval_iterations: usize,
    /// Metric that decides which checkpoint is best
    #[serde(default = "default_best_metric")]
    pub choose_best_by_metric: String,
    /// Label value excluded from losses and metrics
    #[serde(default = "default_ignore_index")]
    pub ignore_index: i64,
    /// Base seed for data shuffling and weight init
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub precision: PrecisionConfig,
    #[serde(default)]
    pub distillation: DistillConfig,
    /// One scheduler per task
    pub schedulers: Vec<SchedulerConfig>,
    /// One optimizer per task
    pub optimizers: Vec<OptimizerConfig>,
    /// One segmentation loss per task
    pub seg_losses: Vec<SegLossConfig>,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> usize {
    1
}

fn default_log_interval() -> usize {
    50
}

fn default_best_metric() -> String {
    "mean_iou".to_string()
}

fn default_ignore_index() -> i64 {
    255
}

/// Per-task slice of the experiment, handed to the runner
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub task_id: usize,
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
    pub seg_loss: SegLossConfig,
}

impl ExperimentConfig {
    /// Parse a YAML experiment file
    pub fn load_yaml(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&body)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly run
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(Error::Config("tasks list is empty".to_string()));
        }
        let n = self.tasks.len();
        for (name, len) in [
            ("schedulers", self.schedulers.len()),
            ("optimizers", self.optimizers.len()),
            ("seg_losses", self.seg_losses.len()),
        ] {
            if len != n {
                return Err(Error::Config(format!(
                    "{name} has {len} entries but there are {n} tasks"
                )));
            }
        }
        if self.total_train_batch_size == 0 {
            return Err(Error::Config(
                "total_train_batch_size must be positive".to_string(),
            ));
        }
        if let Some(per_worker) = self.batch_size_per_worker {
            if per_worker == 0 {
                return Err(Error::Config(
                    "batch_size_per_worker must be positive".to_string(),
                ));
            }
        }
        if self.save_interval_epochs == 0
            || self.eval_interval_epochs == 0
            || self.log_interval_iterations == 0
        {
            return Err(Error::Config("intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn num_total_classes(&self) -> usize {
        self.tasks.iter().map(Vec::len).sum()
    }

    /// Slice out one task's components
    pub fn for_task(&self, task_id: usize) -> Result<TaskConfig> {
        if task_id >= self.num_tasks() {
            return Err(Error::Config(format!(
                "task {task_id} out of range for {} tasks",
                self.num_tasks()
            )));
        }
        Ok(TaskConfig {
            task_id,
            scheduler: self.schedulers[task_id].clone(),
            optimizer: self.optimizers[task_id].clone(),
            seg_loss: self.seg_losses[task_id].clone(),
        })
    }

    /// Resolve the batch size one worker should use.
    ///
    /// The total must split evenly across workers unless auto-align is
    /// enabled, in which case the per-worker size is rounded down (never
    /// below one) and the effective total shrinks.
    pub fn worker_batch_size(&self, world_size: usize) -> Result<usize> {
        if let Some(per_worker) = self.batch_size_per_worker {
            if !self.auto_align_batch_size && per_worker * world_size != self.total_train_batch_size
            {
                return Err(Error::Config(format!(
                    "batch_size_per_worker {per_worker} x {world_size} workers != total {}",
                    self.total_train_batch_size
                )));
            }
            return Ok(per_worker);
        }
        if self.total_train_batch_size % world_size == 0 {
            return Ok(self.total_train_batch_size / world_size);
        }
        if self.auto_align_batch_size {
            Ok((self.total_train_batch_size / world_size).max(1))
        } else {
            Err(Error::Config(format!(
                "total_train_batch_size {} does not divide across {world_size} workers",
                self.total_train_batch_size
            )))
        }
    }
}
