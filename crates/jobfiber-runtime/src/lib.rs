//! # jobfiber-runtime
//!
//! Platform-specific half of the jobfiber job system.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - Coroutine stacks (mmap with guard pages)
//! - Futex-based mutex, condition signal and semaphore
//! - OS thread wrapper
//! - Coroutines, job counters and the worker pool

pub mod config;
pub mod arch;
pub mod stack;
pub mod sync;
pub mod thread;
pub mod tls;
pub mod coroutine;
pub mod counter;
pub mod job;
mod worker;
pub mod job_system;

// Re-exports
pub use config::JobSystemConfig;
pub use coroutine::Coroutine;
pub use counter::JobCounter;
pub use job::Job;
pub use job_system::{wait_counter, yield_now, JobSystem, JobSystemHandle, JobSystemStats};
pub use stack::{FiberStack, HeapStackAllocator, MmapStackAllocator, StackAllocator, StackRegion};
pub use sync::{ConditionSignal, Mutex, MutexGuard, RawMutex, Semaphore};
pub use thread::{Thread, ThreadInfo};

// Platform detection
cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("jobfiber supports unix targets only");
    }
}

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture");
    }
}
