//! Sequential task orchestration

use crate::config::ExperimentConfig;
use crate::data::{SegDataset, TaskSplit};
use crate::error::{Error, Result};
use crate::logging::TrainLogger;
use crate::parallel::{Collective, WorkerContext};

use super::core::{Runner, SegmentorBuilder};

/// Supplies the datasets for one task of the sequence
pub trait TaskDataProvider: Sync {
    /// Training split: background plus the task's new classes
    fn train_set(&self, split: &TaskSplit, task_id: usize) -> Box<dyn SegDataset>;

    /// Test split: every class known through this task
    fn test_set(&self, split: &TaskSplit, task_id: usize) -> Box<dyn SegDataset>;
}

/// Walks the task sequence in order, one `Runner` per task.
///
/// Tasks are strictly sequential: task `t` cannot start until task `t-1`
/// has published its latest checkpoint, which becomes the frozen history
/// model. Starting from a later task therefore requires the predecessor's
/// checkpoints to already exist on disk.
pub struct TaskSequenceController<'a> {
    config: &'a ExperimentConfig,
    worker: WorkerContext,
    comm: &'a dyn Collective,
    builder: &'a SegmentorBuilder<'a>,
    provider: &'a dyn TaskDataProvider,
    logger: &'a dyn TrainLogger,
}

impl<'a> TaskSequenceController<'a> {
    pub fn new(
        config: &'a ExperimentConfig,
        worker: WorkerContext,
        comm: &'a dyn Collective,
        builder: &'a SegmentorBuilder<'a>,
        provider: &'a dyn TaskDataProvider,
        logger: &'a dyn TrainLogger,
    ) -> Self {
        Self {
            config,
            worker,
            comm,
            builder,
            provider,
            logger,
        }
    }

    /// Train every task from `start_task` onward; returns each task's
    /// best score in order.
    pub fn run(&self, start_task: usize) -> Result<Vec<f64>> {
        let num_tasks = self.config.num_tasks();
        if start_task >= num_tasks {
            return Err(Error::Config(format!(
                "start task {start_task} out of range for {num_tasks} tasks"
            )));
        }
        let split = TaskSplit::new(self.config.tasks.clone())?;
        let mut best_scores = Vec::with_capacity(num_tasks - start_task);
        for task_id in start_task..num_tasks {
            self.logger.info(&format!(
                "starting task {task_id}/{} ({} known classes)",
                num_tasks - 1,
                split.num_known_classes(task_id)
            ));
            let mut runner = Runner::new(
                self.config,
                task_id,
                self.worker,
                self.comm,
                self.builder,
                self.provider.train_set(&split, task_id),
                self.provider.test_set(&split, task_id),
                self.logger,
            )?;
            let best = runner.start()?;
            self.logger.info(&format!(
                "finished task {task_id}: best {} {best:.5}",
                self.config.choose_best_by_metric
            ));
            best_scores.push(best);
            self.comm.barrier()?;
        }
        Ok(best_scores)
    }
}
