//! Bounded worker pool for stripe scans.
//!
//! # Thread Pool Configuration
//!
//! Scanning shares the host with the cache engine that owns the storage, so
//! the pool is capped:
//! - Half of CPU cores, or
//! - Maximum of 4 threads
//!
//! unless a [`Throttle`] supplies a different bound.

use rayon::ThreadPool;

use crate::Result;

/// Maximum threads for stripe scans when no bound is configured
pub const MAX_SCAN_THREADS: usize = 4;

/// Calculate default thread count: min(cpu_cores / 2, MAX_SCAN_THREADS)
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).clamp(1, MAX_SCAN_THREADS)
}

/// Supplies the maximum number of stripe scans that may run at once.
pub trait Throttle: Send + Sync {
    fn max_workers(&self) -> usize;
}

/// A fixed bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedThrottle(pub usize);

impl Default for FixedThrottle {
    fn default() -> Self {
        FixedThrottle(default_thread_count())
    }
}

impl Throttle for FixedThrottle {
    fn max_workers(&self) -> usize {
        self.0
    }
}

impl Throttle for usize {
    fn max_workers(&self) -> usize {
        *self
    }
}

/// Create a thread pool sized by `throttle` (at least one thread).
pub(crate) fn create_thread_pool<T: Throttle + ?Sized>(throttle: &T) -> Result<ThreadPool> {
    let num_threads = throttle.max_workers().max(1);
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("scan-stripe-{}", i))
        .build()?)
}
