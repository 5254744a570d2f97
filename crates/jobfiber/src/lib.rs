//! # jobfiber - Fiber-based job system
//!
//! Run many small jobs on a fixed pool of worker threads and wait for
//! batches of them with a single counter. Jobs execute inside stackful
//! coroutines, so a job that waits for other jobs suspends instead of
//! blocking its worker.
//!
//! ## Features
//!
//! - **Fibers**: hand-written context switch (x86_64, aarch64), mmap'd stacks with guard pages
//! - **Bounded queues**: per-worker capacity, all-or-nothing batch submission
//! - **Job counters**: one counter per batch; waiting inside a job never blocks the worker
//! - **Primitives**: atomics, futex mutex, condition signal, semaphore, threads
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use jobfiber::{Atomic32, Job, JobCounter, JobSystem, JobSystemConfig};
//!
//! fn main() -> jobfiber::SchedResult<()> {
//!     let system = JobSystem::setup(JobSystemConfig::from_env().max_jobs_per_thread(256))?;
//!
//!     let total = Arc::new(Atomic32::new(0));
//!     let counter = JobCounter::new(8);
//!     let jobs = (0..8).map(|_| {
//!         let total = Arc::clone(&total);
//!         Job::new(move || { total.increment(); })
//!     });
//!     system.execute_batch(jobs, Some(&counter))?;
//!     system.wait_counter(&counter);
//!
//!     assert_eq!(total.load(), 8);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │          execute(), wait_counter(), JobCounter              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      JobSystem                              │
//! │      least-loaded placement, stack claim, shutdown drain    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │  Worker   │
//!    │ jobs+sem  │      │ jobs+sem  │      │ jobs+sem  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                     Coroutines                          │
//!    │        register switch, guard-paged stacks, pool        │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use jobfiber_core::{
    AtomicCell,
    AtomicInt,
    Atomic32,
    Atomic64,
    CoroutineState,
    SchedError,
    SchedResult,
    MemoryError,
    WorkerError,
};

// Re-export kprint macros for debug logging
pub use jobfiber_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use jobfiber_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use jobfiber_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use jobfiber_runtime::{
    wait_counter,
    yield_now,
    ConditionSignal,
    Coroutine,
    FiberStack,
    HeapStackAllocator,
    Job,
    JobCounter,
    JobSystem,
    JobSystemConfig,
    JobSystemHandle,
    JobSystemStats,
    MmapStackAllocator,
    Mutex,
    MutexGuard,
    RawMutex,
    Semaphore,
    StackAllocator,
    StackRegion,
    Thread,
    ThreadInfo,
};
pub use jobfiber_runtime::tls::{current_worker_id, in_job};

/// Set up a job system, run `f` with it, then shut it down
///
/// Shutdown waits for every job submitted inside `f` to finish.
pub fn with_job_system<F, T>(config: JobSystemConfig, f: F) -> SchedResult<T>
where
    F: FnOnce(&JobSystem) -> T,
{
    let mut system = JobSystem::setup(config)?;
    let result = f(&system);
    system.shutdown()?;
    Ok(result)
}
