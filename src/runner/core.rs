//! Single-task training driver

use std::collections::BTreeMap;

use ndarray::{Array3, Array4, Axis};

use crate::config::{ExperimentConfig, TaskConfig};
use crate::data::{DataLoader, DistributedSampler, SegDataset, TaskSplit};
use crate::error::{Error, Result};
use crate::eval::{EvalResults, SegmentationEvaluator};
use crate::io::{Checkpoint, CheckpointStore};
use crate::logging::{TrainLogRecord, TrainLogger};
use crate::loss::{LossCoordinator, ModelContext};
use crate::models::{load_state_dict, resize_bilinear, state_dict, LoadMode, Segmentor};
use crate::optim::{build_optimizer, Optimizer, PolyScheduler};
use crate::parallel::{broadcast_params, sync_gradients, Collective, WorkerContext};
use crate::precision::MixedPrecision;

/// Constructs a segmentor with the given classifier width
pub type SegmentorBuilder<'a> = dyn Fn(usize) -> Box<dyn Segmentor> + Sync + 'a;

/// Drives training and evaluation for one task on one worker.
///
/// Construction performs the resume check: a leftover `latest` pointer in
/// the task directory restores the segmentor, optimizer, scheduler, and
/// precision state so the epoch loop continues exactly where it stopped.
pub struct Runner<'a> {
    config: &'a ExperimentConfig,
    task: TaskConfig,
    worker: WorkerContext,
    comm: &'a dyn Collective,
    logger: &'a dyn TrainLogger,
    segmentor: Box<dyn Segmentor>,
    context: ModelContext,
    coordinator: LossCoordinator,
    optimizer: Box<dyn Optimizer>,
    scheduler: PolyScheduler,
    precision: MixedPrecision,
    store: CheckpointStore,
    train_set: Box<dyn SegDataset>,
    test_set: Box<dyn SegDataset>,
    batch_size: usize,
    best_score: f64,
}

impl<'a> Runner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a ExperimentConfig,
        task_id: usize,
        worker: WorkerContext,
        comm: &'a dyn Collective,
        builder: &SegmentorBuilder<'_>,
        train_set: Box<dyn SegDataset>,
        test_set: Box<dyn SegDataset>,
        logger: &'a dyn TrainLogger,
    ) -> Result<Self> {
        let task = config.for_task(task_id)?;
        let split = TaskSplit::new(config.tasks.clone())?;
        let batch_size = config.worker_batch_size(worker.world_size)?;
        let num_known = split.num_known_classes(task_id);

        if train_set.num_classes() != num_known {
            return Err(Error::Config(format!(
                "task {task_id} train set carries {} classes, expected {num_known}",
                train_set.num_classes()
            )));
        }
        if test_set.num_classes() != num_known {
            return Err(Error::Config(format!(
                "task {task_id} test set carries {} classes, expected {num_known}",
                test_set.num_classes()
            )));
        }

        let num_old = if task_id == 0 {
            0
        } else {
            split.num_known_classes(task_id - 1)
        };

        let mut segmentor = builder(num_known);
        let context = if task_id == 0 {
            ModelContext::FirstTask
        } else {
            let prev_store = CheckpointStore::new(&config.work_dir, task_id - 1)?;
            if !prev_store.has_latest() {
                return Err(Error::Resume(format!(
                    "task {task_id} needs the latest checkpoint of task {}, none found",
                    task_id - 1
                )));
            }
            let prev = prev_store.load_latest()?;
            let mut history = builder(num_old);
            load_state_dict(history.as_mut(), &prev.segmentor, LoadMode::Strict)?;
            history.freeze();
            history.set_train(false);
            load_state_dict(segmentor.as_mut(), &prev.segmentor, LoadMode::Bootstrap)?;
            ModelContext::ContinualTask { history }
        };

        let coordinator = LossCoordinator::new(
            task.seg_loss.build(config.ignore_index, num_old),
            &config.distillation,
        );

        let sampler = DistributedSampler::new(
            train_set.len(),
            worker.rank,
            worker.world_size,
            true,
            config.seed,
            task_id,
        );
        let iters_per_epoch = sampler.local_len().div_ceil(batch_size);

        let mut optimizer = build_optimizer(&task.optimizer, task.scheduler.lr)?;
        let mut scheduler = PolyScheduler::new(&task.scheduler, iters_per_epoch);
        let mut precision = MixedPrecision::from_config(&config.precision);
        let store = CheckpointStore::new(&config.work_dir, task_id)?;
        // Metrics live in [0, 1]; with `>=` comparison the first
        // evaluation always qualifies as best
        let mut best_score = 0.0;

        if store.has_latest() {
            let checkpoint = store.load_latest()?;
            if checkpoint.task_id != task_id {
                return Err(Error::Resume(format!(
                    "checkpoint in task {task_id} directory belongs to task {}",
                    checkpoint.task_id
                )));
            }
            load_state_dict(segmentor.as_mut(), &checkpoint.segmentor, LoadMode::Strict)?;
            optimizer.load_state(&checkpoint.optimizer)?;
            scheduler.restore(&checkpoint.scheduler);
            precision.load_state(&checkpoint.precision)?;
            best_score = checkpoint.best_score;
            logger.info(&format!(
                "resuming task {task_id} after epoch {}",
                checkpoint.scheduler.cur_epoch
            ));
        }

        // Every worker starts from rank 0's weights
        broadcast_params(comm, segmentor.params_mut(), 0)?;

        Ok(Self {
            config,
            task,
            worker,
            comm,
            logger,
            segmentor,
            context,
            coordinator,
            optimizer,
            scheduler,
            precision,
            store,
            train_set,
            test_set,
            batch_size,
            best_score,
        })
    }

    /// Best score observed for this task so far
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    /// Snapshot everything needed to resume this task
    pub fn state(&self) -> Checkpoint {
        Checkpoint {
            task_id: self.task.task_id,
            best_score: self.best_score,
            segmentor: state_dict(self.segmentor.as_ref()),
            optimizer: self.optimizer.state(),
            scheduler: self.scheduler.snapshot(),
            precision: self.precision.state(),
        }
    }

    /// Run the remaining epochs for this task and return the best score
    pub fn start(&mut self) -> Result<f64> {
        let max_epochs = self.scheduler.max_epochs;
        let start_epoch = self.scheduler.cur_epoch + 1;
        for epoch in start_epoch..=max_epochs {
            self.train_epoch(epoch)?;

            let due_save = epoch % self.config.save_interval_epochs == 0 || epoch == max_epochs;
            let due_eval = epoch % self.config.eval_interval_epochs == 0 || epoch == max_epochs;

            if due_save {
                if self.worker.is_primary() {
                    self.store.save_epoch(epoch, &self.state())?;
                }
                self.comm.barrier()?;
            }

            if due_eval {
                let results = self.evaluate()?;
                let metric = &self.config.choose_best_by_metric;
                let score = *results.get(metric).ok_or_else(|| {
                    Error::Config(format!("evaluation produced no metric named {metric}"))
                })?;
                if self.worker.is_primary() {
                    let task_id = self.task.task_id;
                    self.logger.info(&format!(
                        "task {task_id} epoch {epoch}/{max_epochs} {metric} {score:.5}"
                    ));
                }
                if score >= self.best_score {
                    self.best_score = score;
                    if self.worker.is_primary() {
                        // Re-save so the marked bundle carries its own score
                        self.store.save_epoch(epoch, &self.state())?;
                        self.store.mark_best(epoch, &results)?;
                    }
                }
                self.comm.barrier()?;
            }
        }
        Ok(self.best_score)
    }

    /// One training pass over this worker's shard
    pub fn train_epoch(&mut self, epoch: usize) -> Result<()> {
        self.segmentor.set_train(true);
        let sampler = DistributedSampler::new(
            self.train_set.len(),
            self.worker.rank,
            self.worker.world_size,
            true,
            self.config.seed,
            self.task.task_id,
        );
        let loader = DataLoader::new(self.train_set.as_ref(), sampler, self.batch_size);
        let max_iters = self.scheduler.max_iters;
        let max_epochs = self.scheduler.max_epochs;

        let mut interval_losses: BTreeMap<String, f32> = BTreeMap::new();
        let mut interval_count = 0usize;

        for batch in loader.epoch_batches(epoch) {
            self.scheduler.zero_grad(self.segmentor.params_mut());
            let logits = self.segmentor.forward(&batch.images);
            let output =
                self.coordinator
                    .compute(&self.context, &batch.images, &logits, &batch.targets)?;
            self.precision
                .scale_and_backward(self.segmentor.as_mut(), &batch.images, &output.grad_logits);
            sync_gradients(
                self.comm,
                self.segmentor.params_mut(),
                self.precision.compresses_sync(),
            )?;
            self.scheduler.step(
                self.optimizer.as_mut(),
                self.segmentor.params_mut(),
                &mut self.precision,
            );
            let lr = self.scheduler.lr();

            for (name, value) in &output.components {
                *interval_losses.entry(name.clone()).or_insert(0.0) += value;
            }
            interval_count += 1;

            if self.scheduler.cur_iter % self.config.log_interval_iterations == 0 {
                if self.worker.is_primary() {
                    let losses = interval_losses
                        .iter()
                        .map(|(k, v)| (k.clone(), v / interval_count as f32))
                        .collect();
                    self.logger.record(&TrainLogRecord {
                        algorithm: self.config.algorithm.clone(),
                        task_name: self.config.task_name.clone(),
                        task_id: self.task.task_id,
                        cur_epoch: epoch,
                        max_epochs,
                        cur_iter: self.scheduler.cur_iter,
                        max_iters,
                        lr,
                        losses,
                    });
                }
                interval_losses.clear();
                interval_count = 0;
            }
        }
        self.scheduler.cur_epoch = epoch;
        Ok(())
    }

    /// Evaluate on the test split, synchronized across workers
    pub fn evaluate(&mut self) -> Result<EvalResults> {
        let was_train = self.segmentor.is_train();
        self.segmentor.set_train(false);

        let sampler = DistributedSampler::new(
            self.test_set.len(),
            self.worker.rank,
            self.worker.world_size,
            false,
            self.config.seed,
            self.task.task_id,
        );
        let loader = DataLoader::new(self.test_set.as_ref(), sampler, self.batch_size);
        let mut evaluator =
            SegmentationEvaluator::new(self.segmentor.num_classes(), self.config.ignore_index);

        for batch in loader.epoch_batches(0) {
            let logits = self.segmentor.forward(&batch.images);
            let (_, h, w) = batch.targets.dim();
            let resized = if logits.dim().2 == h && logits.dim().3 == w {
                logits
            } else {
                resize_bilinear(&logits, h, w, self.segmentor.align_corners())
            };
            let preds = argmax_channels(&resized);
            evaluator.update(&preds, &batch.targets);
        }
        evaluator.synchronize(self.comm)?;
        let results = evaluator.evaluate();

        self.segmentor.set_train(was_train);
        Ok(results)
    }
}

/// Collapse `[B, K, H, W]` logits to `[B, H, W]` predicted labels
pub fn argmax_channels(logits: &Array4<f32>) -> Array3<i64> {
    let (b, k, h, w) = logits.dim();
    let mut preds = Array3::<i64>::zeros((b, h, w));
    for bi in 0..b {
        let image = logits.index_axis(Axis(0), bi);
        for y in 0..h {
            for x in 0..w {
                let mut best = 0usize;
                let mut best_val = image[[0, y, x]];
                for ki in 1..k {
                    let v = image[[ki, y, x]];
                    if v > best_val {
                        best_val = v;
                        best = ki;
                    }
                }
                preds[[bi, y, x]] = best as i64;
            }
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr3;

    #[test]
    fn test_argmax_channels_picks_strongest() {
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 2));
        logits[[0, 2, 0, 0]] = 1.0;
        logits[[0, 1, 0, 1]] = 2.0;
        let preds = argmax_channels(&logits);
        assert_eq!(preds, arr3(&[[[2i64, 1]]]));
    }

    #[test]
    fn test_argmax_channels_ties_favor_lower_index() {
        let logits = Array4::<f32>::zeros((1, 2, 1, 1));
        let preds = argmax_channels(&logits);
        assert_eq!(preds[[0, 0, 0]], 0);
    }
}
