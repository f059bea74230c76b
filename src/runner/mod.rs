//! Task training orchestration
//!
//! - `Runner` drives one task: resume check, epoch loop, periodic
//!   checkpointing and evaluation, best tracking
//! - `TaskSequenceController` walks the task sequence, wiring each task's
//!   history model from its predecessor's latest checkpoint

mod controller;
mod core;

pub use controller::{TaskDataProvider, TaskSequenceController};
pub use core::{Runner, SegmentorBuilder};
