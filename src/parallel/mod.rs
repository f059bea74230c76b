//! Distributed execution seam
//!
//! Workers run in lock-step data parallelism, one model replica each. The
//! transport is an external collaborator reduced to the `Collective` trait:
//! blocking sum reductions, a broadcast, and a barrier. `SingleProcess`
//! serves world-size-1 runs; `ThreadGroup` provides an in-process group for
//! tests and multi-worker demos.

mod local;

pub use local::ThreadGroup;

use crate::models::Param;
use crate::precision::round_trip_bf16;
use crate::Result;

/// The collective primitive handed to runners
///
/// Every call is a blocking collective: all workers must reach it, in the
/// same order, or the group deadlocks. There are no fire-and-forget paths.
pub trait Collective: Send + Sync {
    /// This worker's rank in `[0, world_size)`
    fn rank(&self) -> usize;

    /// Number of workers in the group
    fn world_size(&self) -> usize;

    /// Element-wise sum across workers, result visible to all
    fn all_reduce_sum_f32(&self, buf: &mut [f32]) -> Result<()>;

    /// Element-wise sum across workers for confusion counts
    fn all_reduce_sum_u64(&self, buf: &mut [u64]) -> Result<()>;

    /// Copy `buf` from `root` to every worker
    fn broadcast_f32(&self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Wait for every worker to arrive
    fn barrier(&self) -> Result<()>;
}

/// Identity of one worker plus the single primary-writer gate
///
/// Only the primary worker touches the filesystem (checkpoints, pointers,
/// logs); everything else must consult `is_primary` instead of comparing
/// ranks ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub world_size: usize,
}

impl WorkerContext {
    /// Build a context, validating the rank
    pub fn new(rank: usize, world_size: usize) -> crate::Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(crate::Error::Config(format!(
                "invalid worker rank {rank} for world size {world_size}"
            )));
        }
        Ok(Self { rank, world_size })
    }

    /// Whether this worker performs filesystem side effects
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }
}

/// Single-process collective; every operation is the identity
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_sum_f32(&self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn all_reduce_sum_u64(&self, _buf: &mut [u64]) -> Result<()> {
        Ok(())
    }

    fn broadcast_f32(&self, _buf: &mut [f32], _root: usize) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

/// Average gradients across the group after backward
///
/// With `compress` set, the payload is rounded through bf16 before the
/// reduction, emulating a reduced-precision communication hook.
pub fn sync_gradients(
    comm: &dyn Collective,
    params: &mut [Param],
    compress: bool,
) -> Result<()> {
    if comm.world_size() == 1 {
        return Ok(());
    }
    let scale = 1.0 / comm.world_size() as f32;
    for param in params.iter_mut() {
        let Some(grad) = param.grad_mut() else { continue };
        let buf = grad.as_slice_mut().expect("gradient buffers are contiguous");
        if compress {
            round_trip_bf16(buf);
        }
        comm.all_reduce_sum_f32(buf)?;
        for v in buf.iter_mut() {
            *v *= scale;
        }
    }
    Ok(())
}

/// Broadcast all parameter data from `root`, aligning replicas
pub fn broadcast_params(comm: &dyn Collective, params: &mut [Param], root: usize) -> Result<()> {
    for param in params.iter_mut() {
        let buf = param
            .data_mut()
            .as_slice_mut()
            .expect("parameter buffers are contiguous");
        comm.broadcast_f32(buf, root)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_worker_context_validates_rank() {
        assert!(WorkerContext::new(2, 2).is_err());
        assert!(WorkerContext::new(0, 0).is_err());
        let ctx = WorkerContext::new(0, 4).unwrap();
        assert!(ctx.is_primary());
        assert!(!WorkerContext::new(3, 4).unwrap().is_primary());
    }

    #[test]
    fn test_compressed_sync_rounds_gradients_through_bf16() {
        use std::thread;

        let grads = [0.1_f32, 0.2];
        let expected = (round_trip_scalar(grads[0]) + round_trip_scalar(grads[1])) * 0.5;
        // Rounding must be observable, not a no-op
        assert_ne!(expected, (grads[0] + grads[1]) * 0.5);

        let group = ThreadGroup::new(2);
        let handles: Vec<_> = group
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut p = Param::new("w", vec![1], arr1(&[1.0]));
                    p.accumulate_grad(&arr1(&[grads[g.rank()]]));
                    sync_gradients(&g, std::slice::from_mut(&mut p), true).unwrap();
                    p.grad().unwrap()[0]
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }

    fn round_trip_scalar(v: f32) -> f32 {
        let mut buf = [v];
        round_trip_bf16(&mut buf);
        buf[0]
    }

    #[test]
    fn test_single_process_sync_is_identity() {
        let mut p = Param::new("w", vec![2], arr1(&[1.0, 2.0]));
        p.accumulate_grad(&arr1(&[0.5, 0.5]));
        sync_gradients(&SingleProcess, std::slice::from_mut(&mut p), true).unwrap();
        assert_eq!(p.grad().unwrap()[0], 0.5);
    }
}
