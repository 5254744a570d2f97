//! Blocking mutex on a futex word
//!
//! Not recursive: a thread that locks a mutex it already holds panics
//! instead of deadlocking. Holding a guard across `wait_counter` or
//! `yield_now` inside a job is not supported, since the job may resume on
//! a different worker.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use super::futex::Futex;
use crate::thread::current_id;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
/// Locked, and at least one thread may be sleeping on the word
const CONTENDED: u32 = 2;

const NO_OWNER: u64 = 0;

/// Spins before falling back to a futex wait
const SPIN_LIMIT: u32 = 100;

/// Mutex without attached data
///
/// Lock and unlock are explicit; prefer [`Mutex`] and its guard.
pub struct RawMutex {
    state: Futex,
    owner: AtomicU64,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            state: Futex::new(UNLOCKED),
            owner: AtomicU64::new(NO_OWNER),
        }
    }

    /// Acquire, blocking the OS thread while another holder exists
    ///
    /// # Panics
    ///
    /// If the calling thread already holds the lock.
    pub fn lock(&self) {
        let me = current_id();
        if self.owner.load(Ordering::Relaxed) == me {
            panic!("RawMutex: recursive lock by thread {}", me);
        }
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
        self.owner.store(me, Ordering::Relaxed);
    }

    #[cold]
    fn lock_contended(&self) {
        let mut state = self.spin();
        loop {
            // Taking the lock as CONTENDED is pessimistic but keeps any
            // sleeper from being forgotten on unlock.
            if state != CONTENDED && self.state.swap(CONTENDED, Ordering::Acquire) == UNLOCKED {
                return;
            }
            self.state.wait(CONTENDED);
            state = self.spin();
        }
    }

    fn spin(&self) -> u32 {
        let mut spins = 0;
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state != LOCKED || spins == SPIN_LIMIT {
                return state;
            }
            std::hint::spin_loop();
            spins += 1;
        }
    }

    /// Acquire only if free; never blocks
    pub fn try_lock(&self) -> bool {
        let acquired = self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if acquired {
            self.owner.store(current_id(), Ordering::Relaxed);
        }
        acquired
    }

    /// Release the lock
    ///
    /// # Panics
    ///
    /// If the mutex is not locked, or is held by another thread.
    pub fn unlock(&self) {
        if self.state.load(Ordering::Relaxed) == UNLOCKED {
            panic!("RawMutex: unlock of an unlocked mutex");
        }
        let me = current_id();
        let owner = self.owner.load(Ordering::Relaxed);
        if owner != me {
            panic!("RawMutex: unlock by thread {} of a mutex held by thread {}", me, owner);
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        if self.state.swap(UNLOCKED, Ordering::Release) == CONTENDED {
            self.state.wake_one();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMutex").field("locked", &self.is_locked()).finish()
    }
}

/// Mutual exclusion around a value of type `T`
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the lock; released when the guard drops
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard::new(self)
    }

    /// `None` if the lock is held by anyone (including the caller)
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard::new(self))
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Proof of holding a [`Mutex`]
pub struct MutexGuard<'a, T: ?Sized> {
    pub(super) mutex: &'a Mutex<T>,
    // Unlock must happen on the locking thread's terms; keep guards !Send
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(mutex: &'a Mutex<T>) -> Self {
        Self { mutex, _not_send: PhantomData }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_basic_lock() {
        let mutex = Mutex::new(0);
        {
            let mut guard = mutex.lock();
            *guard = 42;
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
        assert_eq!(mutex.into_inner(), 42);
    }

    #[test]
    fn test_concurrent_increments() {
        let mutex = Arc::new(Mutex::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 80_000);
    }

    #[test]
    fn test_try_lock_held_elsewhere_is_fast() {
        let mutex = Arc::new(Mutex::new(()));
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                let _guard = mutex.lock();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };

        locked_rx.recv().unwrap();
        let start = Instant::now();
        assert!(mutex.try_lock().is_none());
        assert!(start.elapsed() < Duration::from_millis(1));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    #[should_panic(expected = "recursive lock")]
    fn test_recursive_lock_panics() {
        let mutex = RawMutex::new();
        mutex.lock();
        mutex.lock();
    }

    #[test]
    #[should_panic(expected = "unlock of an unlocked mutex")]
    fn test_unlock_unlocked_panics() {
        RawMutex::new().unlock();
    }

    #[test]
    fn test_unlock_by_other_thread_panics() {
        let mutex = Arc::new(RawMutex::new());
        mutex.lock();

        let other = Arc::clone(&mutex);
        let result = thread::spawn(move || other.unlock()).join();
        let payload = result.expect_err("foreign unlock must panic");
        let msg = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .unwrap_or_default();
        assert!(msg.contains("held by thread"), "unexpected panic: {}", msg);

        // Still held by this thread
        assert!(mutex.is_locked());
        mutex.unlock();
        assert!(!mutex.is_locked());
    }
}
