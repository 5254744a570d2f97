//! Condition signal paired with [`Mutex`]
//!
//! Sequence-counter design: a waiter samples the counter while it still
//! holds the mutex, unlocks, and sleeps until the counter moves. Any
//! `signal` or `broadcast` after the sample bumps the counter, so a wakeup
//! between unlock and sleep cannot be lost.

use std::fmt;
use std::sync::atomic::Ordering;

use super::futex::Futex;
use super::mutex::MutexGuard;

pub struct ConditionSignal {
    seq: Futex,
}

impl ConditionSignal {
    pub const fn new() -> Self {
        Self { seq: Futex::new(0) }
    }

    /// Release the guard's mutex, sleep until signalled, re-acquire
    ///
    /// May wake spuriously; see [`wait_while`](Self::wait_while).
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let seq = self.seq.load(Ordering::Acquire);
        let mutex = guard.mutex;
        drop(guard);
        self.seq.wait(seq);
        mutex.lock()
    }

    /// Wait until `condition` returns false
    pub fn wait_while<'a, T: ?Sized, F>(&self, mut guard: MutexGuard<'a, T>, mut condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wake one waiter
    pub fn signal(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        self.seq.wake_one();
    }

    /// Wake every waiter
    pub fn broadcast(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        self.seq.wake_all();
    }
}

impl Default for ConditionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConditionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionSignal").finish_non_exhaustive()
    }
}
