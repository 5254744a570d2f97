//! Error types for the job system
//!
//! Only recoverable conditions are errors. Precondition violations
//! (counter decremented below zero, a coroutine resumed while it is
//! running, recursive mutex acquisition) panic instead.

use core::fmt;

/// Result type for job system operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in job system operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// No worker queue had room for the submission; nothing was enqueued
    QueueFull {
        /// Jobs in the rejected submission
        requested: usize,
        /// Per-worker queue capacity
        capacity: usize,
    },

    /// More jobs were submitted against a counter than it was created for
    CounterOversubscribed {
        /// Count the counter was created with
        initial: i32,
        /// Jobs that would be assigned after this submission
        assigned: i32,
    },

    /// The job system has been shut down
    ShutDown,

    /// Already started (setup called twice, coroutine already running)
    AlreadyStarted,

    /// Configuration rejected by `validate`
    InvalidConfig(&'static str),

    /// Memory allocation/mapping failed
    MemoryError(MemoryError),

    /// Worker thread error
    WorkerError(WorkerError),

    /// Platform-specific error (errno)
    PlatformError(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::QueueFull { requested, capacity } => write!(
                f,
                "job queues full: cannot place {} job(s) (capacity {} per worker)",
                requested, capacity
            ),
            SchedError::CounterOversubscribed { initial, assigned } => write!(
                f,
                "counter oversubscribed: created for {} job(s), {} assigned",
                initial, assigned
            ),
            SchedError::ShutDown => write!(f, "job system shut down"),
            SchedError::AlreadyStarted => write!(f, "already started"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerError(e) => write!(f, "worker error: {}", e),
            SchedError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap or heap allocation failed
    AllocationFailed,

    /// mprotect failed while installing the guard page
    ProtectionFailed,

    /// Requested stack size is unusable
    InvalidStackSize(usize),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::InvalidStackSize(size) => write!(f, "invalid stack size {}", size),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker thread related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn an OS thread
    SpawnFailed,

    /// Thread entry panicked
    Panicked,

    /// Some workers panicked during shutdown
    PanickedOnShutdown(usize),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn thread"),
            WorkerError::Panicked => write!(f, "thread panicked"),
            WorkerError::PanickedOnShutdown(n) => write!(f, "{} worker(s) panicked", n),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::QueueFull { requested: 257, capacity: 256 };
        assert_eq!(
            format!("{}", e),
            "job queues full: cannot place 257 job(s) (capacity 256 per worker)"
        );

        let e = SchedError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: stack allocation failed");
    }

    #[test]
    fn test_error_conversion() {
        let err: SchedError = WorkerError::SpawnFailed.into();
        assert!(matches!(err, SchedError::WorkerError(WorkerError::SpawnFailed)));

        let err: SchedError = MemoryError::InvalidStackSize(3).into();
        assert!(matches!(err, SchedError::MemoryError(MemoryError::InvalidStackSize(3))));
    }
}
