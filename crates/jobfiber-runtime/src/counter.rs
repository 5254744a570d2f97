//! Job counters
//!
//! A counter is created with the number of jobs that will be submitted
//! against it and reaches zero once all of them have finished. Everything
//! those jobs wrote is visible to whoever observes the zero.
//!
//! Jobs suspended on a counter are parked on the counter itself, tagged
//! with the job system they belong to, so a counter completed by one job
//! system wakes waiters in any other.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use jobfiber_core::{kwarn, Atomic32, SchedError, SchedResult};

use crate::job_system::Shared;
use crate::sync::{ConditionSignal, Mutex};
use crate::worker::Parked;

static NEXT_COUNTER_ID: AtomicU64 = AtomicU64::new(1);

struct CounterInner {
    id: u64,
    /// Jobs not yet finished
    count: Atomic32,
    /// Size the counter was created (or last reset) with
    initial: Atomic32,
    /// Jobs submitted against the counter so far
    assigned: Atomic32,
    /// Suspended jobs and their job systems; also the lock `zero` waits on
    waiters: Mutex<Vec<(Weak<Shared>, Parked)>>,
    zero: ConditionSignal,
}

/// Shared handle to an outstanding-job count
///
/// Clones refer to the same counter.
#[derive(Clone)]
pub struct JobCounter {
    inner: Arc<CounterInner>,
}

impl JobCounter {
    /// # Panics
    ///
    /// If `count` is negative.
    pub fn new(count: i32) -> Self {
        assert!(count >= 0, "JobCounter::new: negative count {}", count);
        Self {
            inner: Arc::new(CounterInner {
                id: NEXT_COUNTER_ID.fetch_add(1, Ordering::Relaxed),
                count: Atomic32::new(count),
                initial: Atomic32::new(count),
                assigned: Atomic32::new(0),
                waiters: Mutex::new(Vec::new()),
                zero: ConditionSignal::new(),
            }),
        }
    }

    /// Unique for the lifetime of the process.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Jobs still outstanding
    #[inline]
    pub fn value(&self) -> i32 {
        self.inner.count.load()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }

    pub fn initial(&self) -> i32 {
        self.inner.initial.load()
    }

    /// Block the calling OS thread until the count reaches zero
    ///
    /// Inside a job use `wait_counter`, which suspends only the job.
    pub fn wait(&self) {
        if self.is_complete() {
            return;
        }
        let guard = self.inner.waiters.lock();
        let _guard = self.inner.zero.wait_while(guard, |_| !self.is_complete());
    }

    /// Re-arm a finished counter for another batch of `count` jobs
    ///
    /// # Panics
    ///
    /// If jobs are still outstanding or `count` is negative.
    pub fn reset(&self, count: i32) {
        assert!(count >= 0, "JobCounter::reset: negative count {}", count);
        let _guard = self.inner.waiters.lock();
        assert!(
            self.is_complete(),
            "JobCounter::reset: {} job(s) still outstanding",
            self.value()
        );
        self.inner.initial.store(count);
        self.inner.assigned.store(0);
        self.inner.count.store(count);
    }

    /// Record one finished job, returning the remaining count
    ///
    /// At zero, blocked threads are woken and every parked job is requeued
    /// on its own job system.
    ///
    /// # Panics
    ///
    /// If the count would go below zero.
    pub(crate) fn decrement(&self) -> i32 {
        let remaining = self.inner.count.decrement();
        if remaining < 0 {
            panic!("JobCounter {}: decremented below zero", self.inner.id);
        }
        if remaining == 0 {
            let parked = {
                let mut waiters = self.inner.waiters.lock();
                self.inner.zero.broadcast();
                mem::take(&mut *waiters)
            };
            for (system, task) in parked {
                match system.upgrade() {
                    Some(shared) => shared.schedule_resume(task),
                    None => kwarn!("counter {}: waiter's job system is gone", self.inner.id),
                }
            }
        }
        remaining
    }

    /// Park `task` until the count reaches zero
    ///
    /// The count is re-read under the waiter lock that `decrement` takes,
    /// so a completion cannot slip between the check and the push. Returns
    /// the task if the counter is already complete.
    pub(crate) fn park(&self, system: &Arc<Shared>, task: Parked) -> Option<Parked> {
        let mut waiters = self.inner.waiters.lock();
        if self.is_complete() {
            return Some(task);
        }
        waiters.push((Arc::downgrade(system), task));
        None
    }

    /// Jobs currently parked on this counter
    pub(crate) fn parked(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    /// Reserve `jobs` submissions against this counter
    pub(crate) fn assign(&self, jobs: usize) -> SchedResult<()> {
        let initial = self.initial();
        let jobs = i32::try_from(jobs).unwrap_or(i32::MAX);
        let mut current = self.inner.assigned.load();
        loop {
            let wanted = current.saturating_add(jobs);
            if wanted > initial {
                return Err(SchedError::CounterOversubscribed { initial, assigned: wanted });
            }
            match self.inner.assigned.compare_exchange(current, wanted) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Undo an `assign` whose submission was rejected
    pub(crate) fn unassign(&self, jobs: usize) {
        self.inner.assigned.fetch_sub(jobs as i32);
    }
}

impl fmt::Debug for JobCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCounter")
            .field("id", &self.inner.id)
            .field("value", &self.value())
            .field("initial", &self.initial())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_decrement_to_zero() {
        let counter = JobCounter::new(3);
        assert_eq!(counter.decrement(), 2);
        assert_eq!(counter.decrement(), 1);
        assert!(!counter.is_complete());
        assert_eq!(counter.decrement(), 0);
        assert!(counter.is_complete());
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_decrement_below_zero_panics() {
        let counter = JobCounter::new(1);
        counter.decrement();
        counter.decrement();
    }

    #[test]
    fn test_wait_blocks_until_zero() {
        let counter = JobCounter::new(4);
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let counter = counter.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * i));
                    counter.decrement();
                })
            })
            .collect();

        counter.wait();
        assert_eq!(counter.value(), 0);
        for w in workers {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_zero_counter_wait_returns() {
        JobCounter::new(0).wait();
    }

    #[test]
    fn test_assign_limits() {
        let counter = JobCounter::new(3);
        counter.assign(2).unwrap();
        assert_eq!(
            counter.assign(2),
            Err(SchedError::CounterOversubscribed { initial: 3, assigned: 4 })
        );
        counter.assign(1).unwrap();
        counter.unassign(1);
        counter.assign(1).unwrap();
    }

    #[test]
    fn test_reset() {
        let counter = JobCounter::new(1);
        counter.assign(1).unwrap();
        counter.decrement();
        counter.reset(2);
        assert_eq!(counter.value(), 2);
        assert_eq!(counter.initial(), 2);
        counter.assign(2).unwrap();
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn test_reset_outstanding_panics() {
        JobCounter::new(1).reset(5);
    }

    #[test]
    fn test_ids_unique() {
        let a = JobCounter::new(1);
        assert_ne!(a.id(), JobCounter::new(1).id());
        assert_eq!(a.id(), a.clone().id());
    }
}
