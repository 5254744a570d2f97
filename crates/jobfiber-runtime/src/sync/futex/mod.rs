//! Futex word
//!
//! A 32-bit atomic that threads can sleep on until it changes. Every
//! blocking primitive in this crate is built on it. Linux uses the
//! `futex(2)` syscall directly; other platforms emulate it with a std
//! mutex and condvar.
//!
//! `wait` may return spuriously; callers always re-check their condition.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::Futex;
    } else {
        mod fallback;
        pub use fallback::Futex;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let futex = Futex::new(1);
        // Expected value mismatch: must not block
        futex.wait(0);
        assert_eq!(futex.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_wake_one() {
        let futex = Arc::new(Futex::new(0));
        let futex2 = Arc::clone(&futex);

        let handle = thread::spawn(move || {
            while futex2.load(Ordering::Acquire) == 0 {
                futex2.wait(0);
            }
        });

        thread::sleep(Duration::from_millis(20));
        futex.store(1, Ordering::Release);
        futex.wake_one();
        handle.join().unwrap();
    }
}
