//! Per-OS-thread execution context
//!
//! Holds the thread's root register file (where a coroutine returns when it
//! yields or finishes without a coroutine parent), the coroutine currently
//! running on the thread, and worker-local scheduler state.
//!
//! Every accessor is `#[inline(never)]`: a coroutine can be suspended on
//! one thread and resumed on another, and an inlined thread-local address
//! computed before the switch would then point at the wrong thread.

use std::cell::{Cell, UnsafeCell};
use std::ptr;

use jobfiber_core::constants::WORKER_NONE;

use crate::arch::SavedRegs;
use crate::coroutine::CoroutineContext;
use crate::counter::JobCounter;

/// Why a job's coroutine handed control back to its worker
pub(crate) enum Suspend {
    /// Wait until the counter reaches zero
    Wait(JobCounter),
    /// Requeue behind other work
    Yield,
}

struct ThreadContext {
    root: UnsafeCell<SavedRegs>,
    current: Cell<*mut CoroutineContext>,
    job: Cell<*mut CoroutineContext>,
    suspend: Cell<Option<Suspend>>,
    worker: Cell<(u64, usize)>,
}

thread_local! {
    static THREAD_CONTEXT: ThreadContext = const {
        ThreadContext {
            root: UnsafeCell::new(SavedRegs::ZERO),
            current: Cell::new(ptr::null_mut()),
            job: Cell::new(ptr::null_mut()),
            suspend: Cell::new(None),
            worker: Cell::new((0, WORKER_NONE)),
        }
    };
}

/// Save slot for the thread's own (non-coroutine) context
#[inline(never)]
pub(crate) fn root_regs() -> *mut SavedRegs {
    THREAD_CONTEXT.with(|tc| tc.root.get())
}

/// Coroutine running on this thread, or null
#[inline(never)]
pub(crate) fn current_coroutine() -> *mut CoroutineContext {
    THREAD_CONTEXT.with(|tc| tc.current.get())
}

#[inline(never)]
pub(crate) fn set_current_coroutine(ctx: *mut CoroutineContext) {
    THREAD_CONTEXT.with(|tc| tc.current.set(ctx));
}

/// Job coroutine the worker on this thread is driving, or null
#[inline(never)]
pub(crate) fn job_coroutine() -> *mut CoroutineContext {
    THREAD_CONTEXT.with(|tc| tc.job.get())
}

#[inline(never)]
pub(crate) fn set_job_coroutine(ctx: *mut CoroutineContext) {
    THREAD_CONTEXT.with(|tc| tc.job.set(ctx));
}

/// True when called from the body of a job (not a nested coroutine inside it)
#[inline(never)]
pub fn in_job() -> bool {
    THREAD_CONTEXT.with(|tc| {
        let current = tc.current.get();
        !current.is_null() && current == tc.job.get()
    })
}

#[inline(never)]
pub(crate) fn set_suspend(reason: Suspend) {
    THREAD_CONTEXT.with(|tc| tc.suspend.set(Some(reason)));
}

#[inline(never)]
pub(crate) fn take_suspend() -> Option<Suspend> {
    THREAD_CONTEXT.with(|tc| tc.suspend.take())
}

/// Mark this thread as worker `index` of job system `system`
#[inline(never)]
pub(crate) fn set_worker(system: u64, index: usize) {
    THREAD_CONTEXT.with(|tc| tc.worker.set((system, index)));
}

#[inline(never)]
pub(crate) fn clear_worker() {
    THREAD_CONTEXT.with(|tc| tc.worker.set((0, WORKER_NONE)));
}

/// Worker index of this thread within job system `system`
#[inline(never)]
pub(crate) fn worker_of(system: u64) -> Option<usize> {
    THREAD_CONTEXT.with(|tc| match tc.worker.get() {
        (id, index) if id == system && index != WORKER_NONE => Some(index),
        _ => None,
    })
}

/// Worker index of this thread in whichever job system owns it
#[inline(never)]
pub fn current_worker_id() -> Option<usize> {
    THREAD_CONTEXT.with(|tc| match tc.worker.get().1 {
        WORKER_NONE => None,
        index => Some(index),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_outside_workers() {
        assert!(current_coroutine().is_null());
        assert!(!in_job());
        assert_eq!(current_worker_id(), None);
        assert!(take_suspend().is_none());
    }

    #[test]
    fn test_worker_marking() {
        set_worker(7, 2);
        assert_eq!(worker_of(7), Some(2));
        assert_eq!(worker_of(8), None);
        assert_eq!(current_worker_id(), Some(2));
        clear_worker();
        assert_eq!(current_worker_id(), None);
    }
}
