//! Dataset collaborators, task splits, and deterministic loading
//!
//! File enumeration and image decoding are external concerns; the crate
//! consumes any `SegDataset` implementation. `SyntheticSegDataset` keeps
//! the CLI demo and tests self-contained.

mod dataset;
mod loader;
mod sampler;

pub use dataset::{Sample, SegDataset, SyntheticSegDataset, TaskSplit};
pub use loader::{Batch, DataLoader};
pub use sampler::DistributedSampler;
