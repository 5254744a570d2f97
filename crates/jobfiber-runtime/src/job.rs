//! Units of work

use std::fmt;
use std::sync::Arc;

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Work submitted to a [`JobSystem`](crate::JobSystem)
///
/// Runs exactly once, inside a coroutine on some worker.
pub struct Job {
    entry: Entry,
}

impl Job {
    pub fn new<F>(entry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { entry: Box::new(entry) }
    }

    /// Entry function plus a payload shared with the submitter
    ///
    /// The payload outlives the job; the submitter reads results from it
    /// once the job's counter reaches zero.
    pub fn with_payload<P>(entry: fn(&P), payload: Arc<P>) -> Self
    where
        P: Send + Sync + 'static,
    {
        Self::new(move || entry(&payload))
    }

    pub(crate) fn into_entry(self) -> Entry {
        self.entry
    }
}

impl<F> From<F> for Job
where
    F: FnOnce() + Send + 'static,
{
    fn from(entry: F) -> Self {
        Job::new(entry)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}
