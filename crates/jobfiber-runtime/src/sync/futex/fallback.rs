//! Portable futex emulation using std::sync::Condvar
//!
//! Used on platforms without a futex syscall. The inner mutex is held while
//! the word is compared and while waking, so a wake between the check and
//! the sleep cannot be lost.

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

pub struct Futex {
    word: AtomicU32,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Futex {
    pub const fn new(value: u32) -> Self {
        Self {
            word: AtomicU32::new(value),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub fn wait(&self, expected: u32) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.word.load(Ordering::Acquire) != expected {
            return;
        }
        let _guard = self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
    }

    pub fn wake_one(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_one();
    }

    pub fn wake_all(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.condvar.notify_all();
    }
}

impl Deref for Futex {
    type Target = AtomicU32;

    #[inline]
    fn deref(&self) -> &AtomicU32 {
        &self.word
    }
}
