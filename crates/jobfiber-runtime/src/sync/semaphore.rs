//! Counting semaphore on a futex word

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use super::futex::Futex;

/// Permit counter; `wait` blocks while no permit is available
pub struct Semaphore {
    permits: Futex,
    sleepers: AtomicU32,
}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Self {
            permits: Futex::new(initial),
            sleepers: AtomicU32::new(0),
        }
    }

    /// Add one permit, waking a sleeper if there is one
    pub fn post(&self) {
        self.permits.fetch_add(1, Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) != 0 {
            self.permits.wake_one();
        }
    }

    /// Take one permit, blocking until one is available
    pub fn wait(&self) {
        loop {
            if self.try_wait() {
                return;
            }
            self.sleepers.fetch_add(1, Ordering::SeqCst);
            if self.permits.load(Ordering::SeqCst) == 0 {
                self.permits.wait(0);
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Take one permit if available; never blocks
    pub fn try_wait(&self) -> bool {
        let mut current = self.permits.load(Ordering::Relaxed);
        while current > 0 {
            match self.permits.compare_exchange_weak(current, current - 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Current permit count (stale as soon as it returns)
    pub fn permits(&self) -> u32 {
        self.permits.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore").field("permits", &self.permits()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_permits() {
        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert_eq!(sem.permits(), 1);
        sem.wait();
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn test_producer_consumer() {
        let sem = Arc::new(Semaphore::new(0));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        sem.wait();
                    }
                })
            })
            .collect();

        for _ in 0..4000 {
            sem.post();
        }
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(sem.permits(), 0);
    }
}
