//! Blocking synchronization primitives
//!
//! These block the OS thread. Inside a job, waiting on a
//! [`JobCounter`](crate::JobCounter) should go through
//! [`JobSystem::wait_counter`](crate::JobSystem::wait_counter) instead, which
//! suspends only the job.

pub mod futex;
mod mutex;
mod condition;
mod semaphore;

pub use condition::ConditionSignal;
pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use semaphore::Semaphore;
