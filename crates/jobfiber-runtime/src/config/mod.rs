//! Job system configuration
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (read by `from_env`)
//! 3. User's `JF_CONFIG_RS` file (compile-time, `custom-config` feature)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use jobfiber_runtime::config::JobSystemConfig;
//!
//! let config = JobSystemConfig::from_env()
//!     .num_workers(4)
//!     .max_jobs_per_thread(256);
//! ```

pub mod defaults;

use std::sync::Arc;

use jobfiber_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use jobfiber_core::env::{env_get, env_get_bool};
use jobfiber_core::{kprintln, SchedError, SchedResult};

use crate::stack::{default_allocator, StackAllocator};

/// Job system configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct JobSystemConfig {
    /// Worker threads; 0 means one per available CPU
    pub num_workers: usize,
    /// Bounded job queue capacity of each worker
    pub max_jobs_per_thread: usize,
    /// Usable stack bytes per coroutine (guard page not included)
    pub stack_size: usize,
    /// Idle stacks each worker keeps for reuse
    pub stack_pool_size: usize,
    /// Log setup/shutdown at info level
    pub debug_logging: bool,
    /// Source of coroutine stacks
    pub stack_allocator: Arc<dyn StackAllocator>,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl JobSystemConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `JF_NUM_WORKERS` - Worker threads (0 = auto)
    /// - `JF_MAX_JOBS_PER_THREAD` - Per-worker queue capacity
    /// - `JF_STACK_SIZE` - Coroutine stack size in bytes
    /// - `JF_STACK_POOL_SIZE` - Idle stacks kept per worker (pooled across workers)
    /// - `JF_DEBUG` - Verbose setup/shutdown logging (0/1)
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("JF_NUM_WORKERS", defaults::NUM_WORKERS),
            max_jobs_per_thread: env_get("JF_MAX_JOBS_PER_THREAD", defaults::MAX_JOBS_PER_THREAD),
            stack_size: env_get("JF_STACK_SIZE", defaults::STACK_SIZE),
            stack_pool_size: env_get("JF_STACK_POOL_SIZE", defaults::STACK_POOL_SIZE),
            debug_logging: env_get_bool("JF_DEBUG", defaults::DEBUG_LOGGING),
            stack_allocator: default_allocator(),
        }
    }

    /// Compile-time defaults only, ignoring the environment.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            max_jobs_per_thread: defaults::MAX_JOBS_PER_THREAD,
            stack_size: defaults::STACK_SIZE,
            stack_pool_size: defaults::STACK_POOL_SIZE,
            debug_logging: defaults::DEBUG_LOGGING,
            stack_allocator: default_allocator(),
        }
    }

    // Builder methods

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_jobs_per_thread(mut self, n: usize) -> Self {
        self.max_jobs_per_thread = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn stack_pool_size(mut self, n: usize) -> Self {
        self.stack_pool_size = n;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn stack_allocator(mut self, allocator: Arc<dyn StackAllocator>) -> Self {
        self.stack_allocator = allocator;
        self
    }

    /// Worker count after resolving 0 to the available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.num_workers != 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_WORKERS)
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.num_workers > MAX_WORKERS {
            return Err(SchedError::InvalidConfig("num_workers exceeds MAX_WORKERS"));
        }
        if self.max_jobs_per_thread == 0 {
            return Err(SchedError::InvalidConfig("max_jobs_per_thread must be > 0"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedError::InvalidConfig("stack_size must be >= 16KB"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("jobfiber configuration:");
        kprintln!("  num_workers:          {} (effective {})", self.num_workers, self.effective_workers());
        kprintln!("  max_jobs_per_thread:  {}", self.max_jobs_per_thread);
        kprintln!("  stack_size:           {}", self.stack_size);
        kprintln!("  stack_pool_size:      {}", self.stack_pool_size);
        kprintln!("  debug_logging:        {}", self.debug_logging);
        kprintln!("  stack_allocator:      {:?}", self.stack_allocator);
    }
}
