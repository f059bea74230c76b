//! Batch assembly

use ndarray::{Array3, Array4};

use super::{DistributedSampler, SegDataset};

/// One training or evaluation batch
#[derive(Debug, Clone)]
pub struct Batch {
    /// Images `[B, C, H, W]`
    pub images: Array4<f32>,
    /// Pixel labels `[B, H, W]`
    pub targets: Array3<i64>,
}

/// Assembles a worker's shard into fixed-size batches
pub struct DataLoader<'a> {
    dataset: &'a dyn SegDataset,
    sampler: DistributedSampler,
    batch_size: usize,
}

impl<'a> DataLoader<'a> {
    /// Create a loader; `batch_size` is per worker
    pub fn new(dataset: &'a dyn SegDataset, sampler: DistributedSampler, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            dataset,
            sampler,
            batch_size,
        }
    }

    /// Batches per epoch, identical across workers
    pub fn batches_per_epoch(&self) -> usize {
        self.sampler.local_len().div_ceil(self.batch_size)
    }

    /// Materialize this worker's batches for an epoch
    ///
    /// The deterministic reshuffle lives in the sampler; calling this twice
    /// with the same epoch yields identical batches.
    pub fn epoch_batches(&self, epoch: usize) -> Vec<Batch> {
        let indices = self.sampler.local_indices(epoch);
        indices
            .chunks(self.batch_size)
            .map(|chunk| self.collate(chunk))
            .collect()
    }

    fn collate(&self, indices: &[usize]) -> Batch {
        let first = self.dataset.sample(indices[0]);
        let (c, h, w) = first.image.dim();
        let b = indices.len();
        let mut images = Array4::<f32>::zeros((b, c, h, w));
        let mut targets = Array3::<i64>::zeros((b, h, w));
        for (bi, &idx) in indices.iter().enumerate() {
            let sample = if bi == 0 {
                first.clone()
            } else {
                self.dataset.sample(idx)
            };
            images
                .index_axis_mut(ndarray::Axis(0), bi)
                .assign(&sample.image);
            targets
                .index_axis_mut(ndarray::Axis(0), bi)
                .assign(&sample.target);
        }
        Batch { images, targets }
    }
}
