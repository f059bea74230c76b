//! Continuar: class-incremental semantic-segmentation training
//!
//! Trains a segmentor over an ordered sequence of tasks, each introducing
//! new classes. Later tasks distill against a frozen snapshot of the
//! previous task's model so old classes are not forgotten.
//!
//! # Architecture
//!
//! - [`runner`]: per-task training driver and the sequential task
//!   controller
//! - [`loss`]: supervised (plain and unbiased) cross-entropy plus the
//!   distillation term, all returning closed-form logit gradients
//! - [`models`]: the segmentor seam, parameter store, and state dicts
//! - [`optim`]: SGD with momentum and the polynomial lr scheduler
//! - [`precision`]: loss-scaled training with overflow skip/backoff
//! - [`parallel`]: collective-communication seam with an in-process
//!   thread-group implementation
//! - [`io`]: checkpoint bundles and atomic latest/best pointers
//!
//! # Example
//!
//! ```no_run
//! use continuar::config::ExperimentConfig;
//! use continuar::logging::LocalLogger;
//! use continuar::models::{LinearSegmentor, Segmentor};
//! use continuar::parallel::{SingleProcess, WorkerContext};
//! use continuar::runner::TaskSequenceController;
//! # use continuar::data::{SegDataset, TaskSplit};
//! # struct P;
//! # impl continuar::runner::TaskDataProvider for P {
//! #     fn train_set(&self, _s: &TaskSplit, _t: usize) -> Box<dyn SegDataset> { unimplemented!() }
//! #     fn test_set(&self, _s: &TaskSplit, _t: usize) -> Box<dyn SegDataset> { unimplemented!() }
//! # }
//!
//! # fn main() -> continuar::Result<()> {
//! let config = ExperimentConfig::load_yaml("experiment.yaml".as_ref())?;
//! let builder = |num_classes: usize| -> Box<dyn Segmentor> {
//!     Box::new(LinearSegmentor::new(num_classes, 3, false, 0))
//! };
//! let logger = LocalLogger::stderr_only();
//! let controller = TaskSequenceController::new(
//!     &config,
//!     WorkerContext::new(0, 1)?,
//!     &SingleProcess,
//!     &builder,
//!     &P,
//!     &logger,
//! );
//! let best_scores = controller.run(0)?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod io;
pub mod logging;
pub mod loss;
pub mod models;
pub mod optim;
pub mod parallel;
pub mod precision;
pub mod runner;

pub use error::{Error, Result};
