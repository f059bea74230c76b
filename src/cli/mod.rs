//! Command-line interface
//!
//! - `train`: run the incremental task sequence described by a YAML config
//! - `validate`: check a configuration without training
//! - `info`: summarize a configuration

use std::path::PathBuf;
use std::thread;

use clap::{Parser, Subcommand};

use crate::config::ExperimentConfig;
use crate::data::{SegDataset, SyntheticSegDataset, TaskSplit};
use crate::error::{Error, Result};
use crate::logging::{LocalLogger, NullLogger, TrainLogger};
use crate::models::{LinearSegmentor, Segmentor};
use crate::parallel::{SingleProcess, ThreadGroup, WorkerContext};
use crate::runner::{SegmentorBuilder, TaskDataProvider, TaskSequenceController};

/// Continual semantic-segmentation training
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "continuar")]
#[command(version)]
#[command(about = "Class-incremental segmentation training with distillation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train the task sequence from a YAML configuration
    Train(TrainArgs),

    /// Validate a configuration file without training
    Validate(ConfigArgs),

    /// Display information about a configuration
    Info(ConfigArgs),
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TrainArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// First task to train (earlier tasks must already have checkpoints)
    #[arg(long, default_value_t = 0)]
    pub start_task: usize,

    /// Number of in-process data-parallel workers
    #[arg(long, default_value_t = 1)]
    pub world_size: usize,

    /// Samples per synthetic training split
    #[arg(long, default_value_t = 128)]
    pub train_samples: usize,

    /// Samples per synthetic test split
    #[arg(long, default_value_t = 32)]
    pub test_samples: usize,

    /// Square side of the synthetic images
    #[arg(long, default_value_t = 24)]
    pub image_size: usize,
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ConfigArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

const IMAGE_CHANNELS: usize = 3;

/// Synthetic data keyed off the experiment seed
struct SyntheticProvider {
    train_samples: usize,
    test_samples: usize,
    image_size: usize,
    ignore_index: i64,
    seed: u64,
}

impl TaskDataProvider for SyntheticProvider {
    fn train_set(&self, split: &TaskSplit, task_id: usize) -> Box<dyn SegDataset> {
        Box::new(SyntheticSegDataset::train_set(
            split,
            task_id,
            self.train_samples,
            IMAGE_CHANNELS,
            self.image_size,
            self.image_size,
            self.ignore_index,
            self.seed,
        ))
    }

    fn test_set(&self, split: &TaskSplit, task_id: usize) -> Box<dyn SegDataset> {
        Box::new(SyntheticSegDataset::test_set(
            split,
            task_id,
            self.test_samples,
            IMAGE_CHANNELS,
            self.image_size,
            self.image_size,
            self.ignore_index,
            self.seed,
        ))
    }
}

/// Dispatch a parsed command line
pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Train(args) => run_train(args),
        Command::Validate(args) => {
            ExperimentConfig::load_yaml(&args.config)?;
            println!("Configuration valid: {}", args.config.display());
            Ok(())
        }
        Command::Info(args) => {
            let config = ExperimentConfig::load_yaml(&args.config)?;
            println!("{}", format_config_info(&config));
            Ok(())
        }
    }
}

fn format_config_info(config: &ExperimentConfig) -> String {
    let mut lines = vec![
        format!("Algorithm: {}", config.algorithm),
        format!("Task setting: {}", config.task_name),
        format!("Work dir: {}", config.work_dir.display()),
        format!(
            "Tasks: {} ({} classes total)",
            config.num_tasks(),
            config.num_total_classes()
        ),
    ];
    for (task_id, classes) in config.tasks.iter().enumerate() {
        lines.push(format!(
            "  task {task_id}: classes {classes:?}, {} epochs, lr {}",
            config.schedulers[task_id].max_epochs, config.schedulers[task_id].lr
        ));
    }
    lines.push(format!(
        "Batch size: {} total, best by {}",
        config.total_train_batch_size, config.choose_best_by_metric
    ));
    lines.join("\n")
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = ExperimentConfig::load_yaml(&args.config)?;
    if args.world_size == 0 {
        return Err(Error::Config("world size must be positive".to_string()));
    }
    std::fs::create_dir_all(&config.work_dir)?;

    let provider = SyntheticProvider {
        train_samples: args.train_samples,
        test_samples: args.test_samples,
        image_size: args.image_size,
        ignore_index: config.ignore_index,
        seed: config.seed,
    };
    let seed = config.seed;
    let builder = move |num_classes: usize| -> Box<dyn Segmentor> {
        Box::new(LinearSegmentor::new(
            num_classes,
            IMAGE_CHANNELS,
            false,
            seed,
        ))
    };

    if args.world_size == 1 {
        let logger = LocalLogger::with_file(&config.work_dir.join("train.log"))?;
        let worker = WorkerContext::new(0, 1)?;
        let controller = TaskSequenceController::new(
            &config,
            worker,
            &SingleProcess,
            &builder,
            &provider,
            &logger,
        );
        let scores = controller.run(args.start_task)?;
        logger.info(&format!("task sequence complete, best scores {scores:?}"));
        return Ok(());
    }

    let groups = ThreadGroup::new(args.world_size);
    let primary_logger = LocalLogger::with_file(&config.work_dir.join("train.log"))?;
    let builder_ref: &SegmentorBuilder<'_> = &builder;
    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for (rank, group) in groups.iter().enumerate() {
            let config = &config;
            let provider = &provider;
            let primary_logger = &primary_logger;
            handles.push(scope.spawn(move || -> Result<Vec<f64>> {
                let worker = WorkerContext::new(rank, args.world_size)?;
                let null = NullLogger;
                let logger: &dyn TrainLogger = if worker.is_primary() {
                    primary_logger
                } else {
                    &null
                };
                let controller = TaskSequenceController::new(
                    config,
                    worker,
                    group,
                    builder_ref,
                    provider,
                    logger,
                );
                controller.run(args.start_task)
            }));
        }
        let mut scores = Vec::new();
        for handle in handles {
            let worker_scores = handle
                .join()
                .map_err(|_| Error::Collective("worker thread panicked".to_string()))??;
            scores = worker_scores;
        }
        primary_logger.info(&format!("task sequence complete, best scores {scores:?}"));
        Ok(())
    })
}
