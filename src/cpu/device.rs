//! Data-parallel dispatch for the solver stages.
//!
//! A dispatch runs one kernel invocation per lane (particle or cell) and
//! returns only once every lane has finished, which is the barrier between
//! two stages. Kernels only see shared references plus, for the `map`/`update`
//! forms, exclusive access to their own output slot. Cross-lane writes go
//! through atomics.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bevy::log::trace;
use bevy::tasks::{ComputeTaskPool, TaskPool};

use crate::error::DeviceError;

pub trait ComputeDevice: Send + Sync {
    fn label(&self) -> &'static str;

    /// Group size the device prefers for `lanes` lanes.
    fn preferred_group_size(&self, lanes: usize) -> usize;

    /// `kernel(i)` for every `i in 0..lanes`.
    fn dispatch<K>(&self, stage: &'static str, lanes: usize, kernel: K) -> Result<(), DeviceError>
    where
        K: Fn(usize) + Sync;

    /// Splits `out` into groups of `group_size` and runs `kernel(group, slots)` per group.
    fn dispatch_groups<T, K>(
        &self,
        stage: &'static str,
        out: &mut [T],
        group_size: usize,
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        T: Send,
        K: Fn(usize, &mut [T]) + Sync;

    /// `kernel(i, &mut a[i], &mut b[i])` for every lane. Both slices must have the same length.
    fn dispatch_update<A, B, K>(
        &self,
        stage: &'static str,
        a: &mut [A],
        b: &mut [B],
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        A: Send,
        B: Send,
        K: Fn(usize, &mut A, &mut B) + Sync;

    /// `out[i] = kernel(i)` for every lane.
    fn dispatch_map<T, K>(
        &self,
        stage: &'static str,
        out: &mut [T],
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        T: Send,
        K: Fn(usize) -> T + Sync,
    {
        let group_size = self.preferred_group_size(out.len());
        self.dispatch_groups(stage, out, group_size, |group, slots| {
            let base = group * group_size;
            for (offset, slot) in slots.iter_mut().enumerate() {
                *slot = kernel(base + offset);
            }
        })
    }

    /// Single-lane job, e.g. a sequential scan.
    fn run_single<R, J>(&self, stage: &'static str, job: J) -> Result<R, DeviceError>
    where
        J: FnOnce() -> R,
    {
        guarded(stage, job)
    }

    fn alloc_filled<T: Clone>(
        &self,
        what: &'static str,
        len: usize,
        value: T,
    ) -> Result<Vec<T>, DeviceError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| DeviceError::Allocation { what, len })?;
        buffer.resize(len, value);
        Ok(buffer)
    }

    fn alloc_with<T, F>(
        &self,
        what: &'static str,
        len: usize,
        init: F,
    ) -> Result<Vec<T>, DeviceError>
    where
        F: FnMut() -> T,
    {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| DeviceError::Allocation { what, len })?;
        buffer.resize_with(len, init);
        Ok(buffer)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "lane panicked".to_owned()
    }
}

fn guarded<R>(stage: &'static str, job: impl FnOnce() -> R) -> Result<R, DeviceError> {
    catch_unwind(AssertUnwindSafe(job)).map_err(|payload| DeviceError::LanePanicked {
        stage,
        message: panic_message(payload),
    })
}

/// Runs one task's worth of lanes, returning the panic message if any lane panicked.
fn run_group(job: impl FnOnce()) -> Option<String> {
    catch_unwind(AssertUnwindSafe(job)).err().map(panic_message)
}

// ============================ serial =====================================

/// Runs every lane in index order on the calling thread.
/// Bit-reproducible, used as the reference backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialDevice;

impl ComputeDevice for SerialDevice {
    fn label(&self) -> &'static str {
        "serial"
    }

    fn preferred_group_size(&self, lanes: usize) -> usize {
        lanes.max(1)
    }

    fn dispatch<K>(&self, stage: &'static str, lanes: usize, kernel: K) -> Result<(), DeviceError>
    where
        K: Fn(usize) + Sync,
    {
        guarded(stage, || (0..lanes).for_each(&kernel))
    }

    fn dispatch_groups<T, K>(
        &self,
        stage: &'static str,
        out: &mut [T],
        group_size: usize,
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        T: Send,
        K: Fn(usize, &mut [T]) + Sync,
    {
        guarded(stage, || {
            for (group, slots) in out.chunks_mut(group_size.max(1)).enumerate() {
                kernel(group, slots);
            }
        })
    }

    fn dispatch_update<A, B, K>(
        &self,
        stage: &'static str,
        a: &mut [A],
        b: &mut [B],
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        A: Send,
        B: Send,
        K: Fn(usize, &mut A, &mut B) + Sync,
    {
        debug_assert_eq!(a.len(), b.len());
        guarded(stage, || {
            for (i, (a, b)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                kernel(i, a, b);
            }
        })
    }
}

// ============================ parallel ===================================

/// Spreads lanes over Bevy's compute task pool. Joining the scope is the stage barrier.
#[derive(Clone, Copy, Debug)]
pub struct ParallelDevice {
    /// Smallest group worth a task of its own.
    pub min_group_size: usize,
}

impl Default for ParallelDevice {
    fn default() -> Self {
        Self { min_group_size: 64 }
    }
}

impl ParallelDevice {
    fn pool(&self) -> &'static TaskPool {
        ComputeTaskPool::get_or_init(TaskPool::default)
    }

    fn collect(stage: &'static str, outcomes: Vec<Option<String>>) -> Result<(), DeviceError> {
        match outcomes.into_iter().flatten().next() {
            Some(message) => Err(DeviceError::LanePanicked { stage, message }),
            None => Ok(()),
        }
    }
}

impl ComputeDevice for ParallelDevice {
    fn label(&self) -> &'static str {
        "parallel"
    }

    fn preferred_group_size(&self, lanes: usize) -> usize {
        // a few groups per thread so uneven cells even out
        let threads = self.pool().thread_num().max(1);
        lanes.div_ceil(threads * 4).max(self.min_group_size).max(1)
    }

    fn dispatch<K>(&self, stage: &'static str, lanes: usize, kernel: K) -> Result<(), DeviceError>
    where
        K: Fn(usize) + Sync,
    {
        if lanes == 0 {
            return Ok(());
        }
        let group_size = self.preferred_group_size(lanes);
        let kernel = &kernel;
        trace!("{stage}: {lanes} lanes in groups of {group_size}");

        let outcomes = self.pool().scope(|scope| {
            for start in (0..lanes).step_by(group_size) {
                let end = (start + group_size).min(lanes);
                scope.spawn(async move { run_group(|| (start..end).for_each(kernel)) });
            }
        });
        Self::collect(stage, outcomes)
    }

    fn dispatch_groups<T, K>(
        &self,
        stage: &'static str,
        out: &mut [T],
        group_size: usize,
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        T: Send,
        K: Fn(usize, &mut [T]) + Sync,
    {
        if out.is_empty() {
            return Ok(());
        }
        let kernel = &kernel;

        let outcomes = self.pool().scope(|scope| {
            for (group, slots) in out.chunks_mut(group_size.max(1)).enumerate() {
                scope.spawn(async move { run_group(|| kernel(group, slots)) });
            }
        });
        Self::collect(stage, outcomes)
    }

    fn dispatch_update<A, B, K>(
        &self,
        stage: &'static str,
        a: &mut [A],
        b: &mut [B],
        kernel: K,
    ) -> Result<(), DeviceError>
    where
        A: Send,
        B: Send,
        K: Fn(usize, &mut A, &mut B) + Sync,
    {
        debug_assert_eq!(a.len(), b.len());
        if a.is_empty() {
            return Ok(());
        }
        let group_size = self.preferred_group_size(a.len());
        let kernel = &kernel;

        let outcomes = self.pool().scope(|scope| {
            let groups = a.chunks_mut(group_size).zip(b.chunks_mut(group_size));
            for (group, (a, b)) in groups.enumerate() {
                let base = group * group_size;
                scope.spawn(async move {
                    run_group(|| {
                        for (offset, (a, b)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                            kernel(base + offset, a, b);
                        }
                    })
                });
            }
        });
        Self::collect(stage, outcomes)
    }
}
