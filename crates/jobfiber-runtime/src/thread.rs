//! OS threads
//!
//! Thin wrapper over `std::thread` that gives every thread a small numeric
//! id (used for mutex ownership checks and logging) and exposes the
//! pthread handle.

use std::cell::Cell;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use jobfiber_core::{SchedResult, WorkerError};
use nix::sys::pthread::{pthread_self, Pthread};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: Cell<u64> = const { Cell::new(0) };
}

/// Numeric id of the calling OS thread (never 0)
///
/// Not inlined: a coroutine that migrates between threads must not reuse a
/// thread-local address computed before it was suspended.
#[inline(never)]
pub fn current_id() -> u64 {
    THREAD_ID.with(|slot| match slot.get() {
        0 => {
            let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            slot.set(id);
            id
        }
        id => id,
    })
}

/// A running (or finished, not yet joined) OS thread
#[derive(Debug)]
pub struct Thread {
    id: u64,
    name: String,
    handle: JoinHandle<()>,
}

impl Thread {
    /// Spawn an OS thread that runs `entry` immediately
    pub fn run<F>(name: impl Into<String>, entry: F) -> SchedResult<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                THREAD_ID.with(|slot| slot.set(id));
                entry();
            })
            .map_err(|_| WorkerError::SpawnFailed)?;

        Ok(Thread { id, name, handle })
    }

    /// Block until the entry returns
    ///
    /// Consumes the handle, so a thread can be joined at most once.
    pub fn join(self) -> SchedResult<()> {
        self.handle.join().map_err(|_| WorkerError::Panicked.into())
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn os_handle(&self) -> Pthread {
        self.handle.as_pthread_t()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Identity of the calling thread
    pub fn current() -> ThreadInfo {
        ThreadInfo {
            id: current_id(),
            name: std::thread::current().name().map(str::to_owned),
            os_handle: pthread_self(),
        }
    }
}

/// Identity of a thread; cannot be joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: u64,
    pub name: Option<String>,
    pub os_handle: Pthread,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_run_and_join() {
        let (tx, rx) = mpsc::channel();
        let thread = Thread::run("jf-test", move || {
            let info = Thread::current();
            tx.send((info.id, info.name, info.os_handle as usize)).unwrap();
        })
        .unwrap();

        let (id, name, os_handle) = rx.recv().unwrap();
        assert_eq!(id, thread.id());
        assert_eq!(name.as_deref(), Some("jf-test"));
        assert_eq!(os_handle, thread.os_handle() as usize);
        assert!(thread.join().is_ok());
    }

    #[test]
    fn test_join_reports_panic() {
        let thread = Thread::run("jf-panics", || panic!("boom")).unwrap();
        assert!(matches!(
            thread.join(),
            Err(jobfiber_core::SchedError::WorkerError(WorkerError::Panicked))
        ));
    }

    #[test]
    fn test_ids_are_distinct() {
        let here = current_id();
        assert_ne!(here, 0);
        assert_eq!(here, current_id());

        let thread = Thread::run("jf-other", || {}).unwrap();
        assert_ne!(thread.id(), here);
        thread.join().unwrap();
    }
}
