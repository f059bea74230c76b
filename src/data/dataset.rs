//! Task splits and the dataset seam

use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{Error, Result};

/// One training example: image `[C, H, W]` and pixel labels `[H, W]`
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub target: Array2<i64>,
}

/// The ordered class-incremental structure of an experiment
///
/// Task ids are contiguous from 0; the flattened class lists must cover
/// `0..total` exactly, in order, so every task's vocabulary is a strict
/// prefix of the next task's.
#[derive(Debug, Clone)]
pub struct TaskSplit {
    tasks: Vec<Vec<usize>>,
}

impl TaskSplit {
    /// Validate and build a split from per-task new-class lists
    pub fn new(tasks: Vec<Vec<usize>>) -> Result<Self> {
        if tasks.is_empty() {
            return Err(Error::Config("task split has no tasks".to_string()));
        }
        let mut expected = 0_usize;
        for (task_id, classes) in tasks.iter().enumerate() {
            if classes.is_empty() {
                return Err(Error::Config(format!("task {task_id} introduces no classes")));
            }
            for &c in classes {
                if c != expected {
                    return Err(Error::Config(format!(
                        "task {task_id}: expected class {expected}, found {c}; \
                         class indices must be contiguous from 0"
                    )));
                }
                expected += 1;
            }
        }
        Ok(Self { tasks })
    }

    /// Number of tasks
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Total classes across all tasks
    pub fn num_total_classes(&self) -> usize {
        self.tasks.iter().map(Vec::len).sum()
    }

    /// Classes newly introduced by a task
    pub fn new_classes(&self, task_id: usize) -> &[usize] {
        &self.tasks[task_id]
    }

    /// Cumulative class count through a task (its classifier width)
    pub fn num_known_classes(&self, task_id: usize) -> usize {
        self.tasks[..=task_id].iter().map(Vec::len).sum()
    }
}

/// A per-task segmentation dataset
pub trait SegDataset: Send + Sync {
    /// Number of samples
    fn len(&self) -> usize;

    /// Whether the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative known-class count at this task
    fn num_classes(&self) -> usize;

    /// Label value excluded from loss and evaluation
    fn ignore_index(&self) -> i64;

    /// Fetch one sample by index
    fn sample(&self, idx: usize) -> Sample;
}

/// Deterministic in-memory dataset
///
/// Pixel labels are drawn from a configured class list and image features
/// carry a class-dependent signal, so the linear reference head can
/// actually fit the data. Everything is a pure function of `(seed, idx)`.
pub struct SyntheticSegDataset {
    len: usize,
    num_classes: usize,
    ignore_index: i64,
    label_classes: Vec<i64>,
    channels: usize,
    height: usize,
    width: usize,
    seed: u64,
}

impl SyntheticSegDataset {
    /// Training view of a task: labels are background plus the task's new
    /// classes, matching how incremental ground truth is annotated.
    pub fn train_set(
        split: &TaskSplit,
        task_id: usize,
        len: usize,
        channels: usize,
        height: usize,
        width: usize,
        ignore_index: i64,
        seed: u64,
    ) -> Self {
        let mut label_classes: Vec<i64> = vec![0];
        label_classes.extend(split.new_classes(task_id).iter().map(|&c| c as i64));
        Self {
            len,
            num_classes: split.num_known_classes(task_id),
            ignore_index,
            label_classes,
            channels,
            height,
            width,
            seed: seed ^ (TRAIN_SEED_TAG + task_id as u64),
        }
    }

    /// Test view of a task: labels span every class known so far
    pub fn test_set(
        split: &TaskSplit,
        task_id: usize,
        len: usize,
        channels: usize,
        height: usize,
        width: usize,
        ignore_index: i64,
        seed: u64,
    ) -> Self {
        let known = split.num_known_classes(task_id);
        Self {
            len,
            num_classes: known,
            ignore_index,
            label_classes: (0..known as i64).collect(),
            channels,
            height,
            width,
            seed: seed ^ (TEST_SEED_TAG + task_id as u64),
        }
    }
}

/// Seed domain separators so train and test views never share streams
const TRAIN_SEED_TAG: u64 = 0x5eed_0000;
const TEST_SEED_TAG: u64 = 0x7e57_0000;

impl SegDataset for SyntheticSegDataset {
    fn len(&self) -> usize {
        self.len
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn ignore_index(&self) -> i64 {
        self.ignore_index
    }

    fn sample(&self, idx: usize) -> Sample {
        assert!(idx < self.len, "sample index out of range");
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_mul(0x9e37_79b9).wrapping_add(idx as u64));
        let mut target = Array2::<i64>::zeros((self.height, self.width));
        let mut image = Array3::<f32>::zeros((self.channels, self.height, self.width));
        for y in 0..self.height {
            for x in 0..self.width {
                let label = self.label_classes[rng.gen_range(0..self.label_classes.len())];
                target[[y, x]] = label;
                for c in 0..self.channels {
                    // Class-dependent mean plus noise
                    let signal = if (label as usize % self.channels) == c { 2.0 } else { -0.5 };
                    image[[c, y, x]] = signal + label as f32 * 0.1 + rng.gen_range(-0.2..0.2);
                }
            }
        }
        Sample { image, target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split() -> TaskSplit {
        TaskSplit::new(vec![vec![0, 1], vec![2], vec![3, 4]]).unwrap()
    }

    #[test]
    fn test_task_split_cumulative_counts() {
        let s = split();
        assert_eq!(s.num_tasks(), 3);
        assert_eq!(s.num_total_classes(), 5);
        assert_eq!(s.num_known_classes(0), 2);
        assert_eq!(s.num_known_classes(1), 3);
        assert_eq!(s.num_known_classes(2), 5);
        assert_eq!(s.new_classes(1), &[2]);
    }

    #[test]
    fn test_task_split_rejects_gaps_and_reorders() {
        assert!(TaskSplit::new(vec![vec![0, 2]]).is_err());
        assert!(TaskSplit::new(vec![vec![1, 0]]).is_err());
        assert!(TaskSplit::new(vec![vec![0], vec![]]).is_err());
        assert!(TaskSplit::new(vec![]).is_err());
    }

    #[test]
    fn test_samples_are_deterministic() {
        let s = split();
        let ds = SyntheticSegDataset::train_set(&s, 1, 4, 3, 4, 4, 255, 42);
        let a = ds.sample(2);
        let b = ds.sample(2);
        assert_eq!(a.target, b.target);
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn test_train_labels_limited_to_background_and_new() {
        let s = split();
        let ds = SyntheticSegDataset::train_set(&s, 1, 8, 3, 6, 6, 255, 42);
        for i in 0..ds.len() {
            for &t in ds.sample(i).target.iter() {
                assert!(t == 0 || t == 2, "unexpected label {t} in task 1 train set");
            }
        }
    }

    #[test]
    fn test_test_labels_span_known_classes() {
        let s = split();
        let ds = SyntheticSegDataset::test_set(&s, 1, 8, 3, 6, 6, 255, 42);
        assert_eq!(ds.num_classes(), 3);
        for i in 0..ds.len() {
            for &t in ds.sample(i).target.iter() {
                assert!((0..3).contains(&t));
            }
        }
    }
}
