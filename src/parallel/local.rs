//! In-process worker group over std synchronization primitives
//!
//! One `ThreadGroup` handle per worker thread. Collectives are uniform and
//! blocking: accumulate under a mutex, barrier, read back, barrier, reset.

use std::sync::{Arc, Barrier, Mutex};

use super::Collective;
use crate::{Error, Result};

struct Shared {
    barrier: Barrier,
    f32_slot: Mutex<Vec<f32>>,
    u64_slot: Mutex<Vec<u64>>,
}

/// One worker's handle into an in-process collective group
pub struct ThreadGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Create a group of `world_size` handles, one per worker thread
    pub fn new(world_size: usize) -> Vec<ThreadGroup> {
        assert!(world_size > 0, "world size must be positive");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(world_size),
            f32_slot: Mutex::new(Vec::new()),
            u64_slot: Mutex::new(Vec::new()),
        });
        (0..world_size)
            .map(|rank| ThreadGroup {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

fn lock_err<T>(_: T) -> Error {
    Error::Collective("worker group mutex poisoned".to_string())
}

macro_rules! reduce_impl {
    ($self:ident, $slot:ident, $buf:ident) => {{
        if $buf.is_empty() {
            $self.shared.barrier.wait();
            $self.shared.barrier.wait();
            $self.shared.barrier.wait();
            return Ok(());
        }
        {
            let mut slot = $self.shared.$slot.lock().map_err(lock_err)?;
            if slot.is_empty() {
                slot.extend_from_slice($buf);
            } else {
                if slot.len() != $buf.len() {
                    return Err(Error::Collective(format!(
                        "non-uniform reduce: rank {} contributed {} elements, group has {}",
                        $self.rank,
                        $buf.len(),
                        slot.len()
                    )));
                }
                for (acc, v) in slot.iter_mut().zip($buf.iter()) {
                    *acc += *v;
                }
            }
        }
        $self.shared.barrier.wait();
        {
            let slot = $self.shared.$slot.lock().map_err(lock_err)?;
            $buf.copy_from_slice(&slot);
        }
        let leader = $self.shared.barrier.wait().is_leader();
        if leader {
            self_clear(&$self.shared.$slot)?;
        }
        $self.shared.barrier.wait();
        Ok(())
    }};
}

fn self_clear<T>(slot: &Mutex<Vec<T>>) -> Result<()> {
    slot.lock().map_err(lock_err)?.clear();
    Ok(())
}

impl Collective for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum_f32(&self, buf: &mut [f32]) -> Result<()> {
        reduce_impl!(self, f32_slot, buf)
    }

    fn all_reduce_sum_u64(&self, buf: &mut [u64]) -> Result<()> {
        reduce_impl!(self, u64_slot, buf)
    }

    fn broadcast_f32(&self, buf: &mut [f32], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(Error::Collective(format!(
                "broadcast root {root} out of range for world size {}",
                self.world_size
            )));
        }
        if self.rank == root {
            let mut slot = self.shared.f32_slot.lock().map_err(lock_err)?;
            slot.clear();
            slot.extend_from_slice(buf);
        }
        self.shared.barrier.wait();
        if self.rank != root {
            let slot = self.shared.f32_slot.lock().map_err(lock_err)?;
            if slot.len() != buf.len() {
                return Err(Error::Collective(format!(
                    "non-uniform broadcast: rank {} expected {} elements, root sent {}",
                    self.rank,
                    buf.len(),
                    slot.len()
                )));
            }
            buf.copy_from_slice(&slot);
        }
        let leader = self.shared.barrier.wait().is_leader();
        if leader {
            self_clear(&self.shared.f32_slot)?;
        }
        self.shared.barrier.wait();
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_all_reduce_sums_across_workers() {
        let group = ThreadGroup::new(3);
        let handles: Vec<_> = group
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut buf = vec![g.rank() as f32 + 1.0, 10.0];
                    g.all_reduce_sum_f32(&mut buf).unwrap();
                    buf
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![6.0, 30.0]);
        }
    }

    #[test]
    fn test_consecutive_reduces_do_not_leak_state() {
        let group = ThreadGroup::new(2);
        let handles: Vec<_> = group
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut first = vec![1.0_f32];
                    g.all_reduce_sum_f32(&mut first).unwrap();
                    let mut second = vec![2.0_f32];
                    g.all_reduce_sum_f32(&mut second).unwrap();
                    (first[0], second[0])
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), (2.0, 4.0));
        }
    }

    #[test]
    fn test_u64_reduce() {
        let group = ThreadGroup::new(2);
        let handles: Vec<_> = group
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut buf = vec![5_u64, g.rank() as u64];
                    g.all_reduce_sum_u64(&mut buf).unwrap();
                    buf
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![10, 1]);
        }
    }

    #[test]
    fn test_broadcast_from_root() {
        let group = ThreadGroup::new(3);
        let handles: Vec<_> = group
            .into_iter()
            .map(|g| {
                thread::spawn(move || {
                    let mut buf = if g.rank() == 1 {
                        vec![7.0_f32, 8.0]
                    } else {
                        vec![0.0, 0.0]
                    };
                    g.broadcast_f32(&mut buf, 1).unwrap();
                    buf
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![7.0, 8.0]);
        }
    }
}
