//! # jobfiber-core
//!
//! Core types for the jobfiber job system.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Blocking primitives, context switching, worker threads and the job
//! scheduler itself live in `jobfiber-runtime`.
//!
//! ## Modules
//!
//! - `atomic` - Lock-free 32/64-bit integer cells
//! - `state` - Coroutine state enum
//! - `error` - Error types
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod atomic;
pub mod state;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use atomic::{AtomicCell, AtomicInt, Atomic32, Atomic64};
pub use state::CoroutineState;
pub use error::{SchedError, SchedResult, MemoryError, WorkerError};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants shared by core and runtime
pub mod constants {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "aarch64", target_os = "macos"))] {
            /// Cache line size for alignment (Apple silicon uses 128-byte lines)
            pub const CACHE_LINE_SIZE: usize = 128;
        } else {
            /// Cache line size for alignment
            pub const CACHE_LINE_SIZE: usize = 64;
        }
    }

    /// Guard page size below every coroutine stack (4 KB)
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest stack a coroutine may be given
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Maximum workers (OS threads) in one job system
    pub const MAX_WORKERS: usize = 64;

    /// Sentinel for "not a worker thread"
    pub const WORKER_NONE: usize = usize::MAX;
}
