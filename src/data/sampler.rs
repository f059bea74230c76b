//! Deterministic distributed sampling
//!
//! The shuffle is a pure function of `(base_seed, task_id, epoch)`, so
//! every worker derives the same global order without coordination, then
//! takes its rank-strided shard. Shards are padded to equal length by
//! wrapping, keeping all workers in lock step.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Epoch-seeded, rank-sharded index sampler
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    shuffle: bool,
    base_seed: u64,
    task_id: usize,
}

impl DistributedSampler {
    /// Create a sampler over `len` samples for one worker
    pub fn new(
        len: usize,
        rank: usize,
        world_size: usize,
        shuffle: bool,
        base_seed: u64,
        task_id: usize,
    ) -> Self {
        assert!(world_size > 0 && rank < world_size, "invalid rank");
        Self {
            len,
            rank,
            world_size,
            shuffle,
            base_seed,
            task_id,
        }
    }

    /// Per-worker shard length, identical across ranks
    pub fn local_len(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// This worker's sample indices for an epoch
    pub fn local_indices(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let seed = self
                .base_seed
                .wrapping_add((self.task_id as u64) << 32)
                .wrapping_add(epoch as u64);
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        // Pad by wrapping so every rank sees the same shard size
        let padded = self.local_len() * self.world_size;
        (self.rank..padded)
            .step_by(self.world_size)
            .map(|i| order[i % self.len])
            .collect()
    }
}
