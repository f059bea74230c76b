//! Filesystem layout and pointer management

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::EvalResults;

use super::Checkpoint;

const LATEST_POINTER: &str = "latest.json";
const BEST_POINTER: &str = "best.json";
const BEST_RESULTS: &str = "best_results.json";

/// Names the epoch artifact a pointer file designates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    /// Last completed epoch at publication time (1-based)
    pub epoch: usize,
    /// Artifact file name relative to the task directory
    pub artifact: String,
}

/// Manages one task's checkpoint directory.
///
/// Artifacts are written once and never mutated; the `latest` and `best`
/// pointer files are republished by writing a sibling temp file and
/// renaming it over the old pointer, so readers only ever see a complete
/// pointer.
pub struct CheckpointStore {
    task_dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) the directory for one task
    pub fn new(work_dir: &Path, task_id: usize) -> Result<Self> {
        let task_dir = work_dir.join(format!("task_{task_id}"));
        fs::create_dir_all(&task_dir)?;
        Ok(Self { task_dir })
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Persist the bundle for a completed epoch and advance `latest`
    pub fn save_epoch(&self, epoch: usize, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let artifact = format!("epoch_{epoch}.ckpt");
        let path = self.task_dir.join(&artifact);
        let body = serde_json::to_vec(checkpoint)
            .map_err(|e| Error::Serialization(format!("checkpoint encode failed: {e}")))?;
        fs::write(&path, body)?;
        self.publish_pointer(LATEST_POINTER, Pointer { epoch, artifact })?;
        Ok(path)
    }

    /// Point `best` at an already-saved epoch and record its metrics
    pub fn mark_best(&self, epoch: usize, results: &EvalResults) -> Result<()> {
        let artifact = format!("epoch_{epoch}.ckpt");
        if !self.task_dir.join(&artifact).exists() {
            return Err(Error::Resume(format!(
                "cannot mark epoch {epoch} as best: {artifact} was never saved"
            )));
        }
        self.publish_pointer(BEST_POINTER, Pointer { epoch, artifact })?;
        let body = serde_json::to_vec_pretty(results)
            .map_err(|e| Error::Serialization(format!("results encode failed: {e}")))?;
        self.write_atomic(BEST_RESULTS, &body)
    }

    /// True when a resumable bundle exists for this task
    pub fn has_latest(&self) -> bool {
        self.task_dir.join(LATEST_POINTER).exists()
    }

    /// Load the bundle `latest` designates
    pub fn load_latest(&self) -> Result<Checkpoint> {
        self.load_pointed(LATEST_POINTER)
    }

    /// Load the bundle `best` designates
    pub fn load_best(&self) -> Result<Checkpoint> {
        self.load_pointed(BEST_POINTER)
    }

    /// Read the pointer file without touching the artifact
    pub fn latest_pointer(&self) -> Result<Pointer> {
        self.read_pointer(LATEST_POINTER)
    }

    fn load_pointed(&self, name: &str) -> Result<Checkpoint> {
        let pointer = self.read_pointer(name)?;
        let path = self.task_dir.join(&pointer.artifact);
        let body = fs::read(&path).map_err(|e| {
            Error::Resume(format!(
                "pointer {name} names missing artifact {}: {e}",
                pointer.artifact
            ))
        })?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("checkpoint decode failed: {e}")))
    }

    fn read_pointer(&self, name: &str) -> Result<Pointer> {
        let path = self.task_dir.join(name);
        let body = fs::read(&path).map_err(|e| {
            Error::Resume(format!(
                "no {name} pointer in {}: {e}",
                self.task_dir.display()
            ))
        })?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Serialization(format!("pointer decode failed: {e}")))
    }

    fn publish_pointer(&self, name: &str, pointer: Pointer) -> Result<()> {
        let body = serde_json::to_vec(&pointer)
            .map_err(|e| Error::Serialization(format!("pointer encode failed: {e}")))?;
        self.write_atomic(name, &body)
    }

    fn write_atomic(&self, name: &str, body: &[u8]) -> Result<()> {
        let tmp = self.task_dir.join(format!("{name}.tmp"));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, self.task_dir.join(name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{OptimizerState, SchedulerSnapshot};
    use crate::precision::{MixedPrecision, PrecisionConfig};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn bundle(task_id: usize, best_score: f64) -> Checkpoint {
        Checkpoint {
            task_id,
            best_score,
            segmentor: BTreeMap::new(),
            optimizer: OptimizerState::SGD {
                lr: 0.01,
                velocities: vec![None, None],
            },
            scheduler: SchedulerSnapshot {
                cur_epoch: 1,
                cur_iter: 5,
                lr: 0.009,
            },
            precision: MixedPrecision::from_config(&PrecisionConfig::default()).state(),
        }
    }

    #[test]
    fn test_save_then_load_latest() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 0).unwrap();
        assert!(!store.has_latest());
        store.save_epoch(1, &bundle(0, 0.4)).unwrap();
        store.save_epoch(2, &bundle(0, 0.6)).unwrap();
        assert!(store.has_latest());
        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.scheduler.cur_iter, 5);
        assert_eq!(loaded.best_score, 0.6);
        assert_eq!(store.latest_pointer().unwrap().epoch, 2);
    }

    #[test]
    fn test_mark_best_requires_saved_epoch() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 0).unwrap();
        let results = EvalResults::new();
        assert!(matches!(
            store.mark_best(3, &results),
            Err(Error::Resume(_))
        ));
    }

    #[test]
    fn test_mark_best_writes_pointer_and_results() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 2).unwrap();
        store.save_epoch(1, &bundle(2, 0.5)).unwrap();
        let mut results = EvalResults::new();
        results.insert("mean_iou".to_string(), 0.5);
        store.mark_best(1, &results).unwrap();
        let best = store.load_best().unwrap();
        assert_eq!(best.task_id, 2);
        let written: EvalResults = serde_json::from_slice(
            &std::fs::read(store.task_dir().join("best_results.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written["mean_iou"], 0.5);
    }

    #[test]
    fn test_load_latest_without_pointer_fails() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 0).unwrap();
        assert!(matches!(store.load_latest(), Err(Error::Resume(_))));
    }

    #[test]
    fn test_pointer_republish_replaces_old_target() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path(), 0).unwrap();
        store.save_epoch(1, &bundle(0, 0.1)).unwrap();
        let p1 = store.latest_pointer().unwrap();
        store.save_epoch(2, &bundle(0, 0.2)).unwrap();
        let p2 = store.latest_pointer().unwrap();
        assert_eq!(p1.artifact, "epoch_1.ckpt");
        assert_eq!(p2.artifact, "epoch_2.ckpt");
        // Both artifacts remain readable
        assert!(store.task_dir().join("epoch_1.ckpt").exists());
    }
}
