//! Stackful coroutines
//!
//! A coroutine runs its entry closure on its own stack and gives control
//! back with [`Coroutine::yield_now`]. Switching is a plain register swap
//! (see `arch`), with no kernel involvement.
//!
//! ```text
//! Unstarted --start--> Suspended <--resume/yield--> Running --return--> Finished
//! ```
//!
//! A coroutine may be resumed from any thread, one at a time. Whoever
//! resumes it becomes its caller: the next yield returns there, whether
//! that is a thread's root context or another coroutine.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use jobfiber_core::{CoroutineState, SchedResult};

use crate::arch::{init_context, switch_context, SavedRegs};
use crate::config::defaults;
use crate::stack::{default_allocator, FiberStack, StackAllocator};
use crate::tls;

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// Heap-pinned execution context; its address is handed to the trampoline
pub(crate) struct CoroutineContext {
    regs: SavedRegs,
    /// Where the next yield (or completion) switches to
    caller: *mut SavedRegs,
    state: AtomicU8,
    entry: Option<Entry>,
    panic: Option<Box<dyn Any + Send + 'static>>,
    stack: FiberStack,
}

impl CoroutineContext {
    #[inline]
    fn state(&self) -> CoroutineState {
        CoroutineState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: CoroutineState) {
        self.state.store(state.into(), Ordering::Release);
    }
}

/// A cooperatively scheduled execution context with its own stack
pub struct Coroutine {
    ctx: Option<Box<CoroutineContext>>,
    /// Stack to use at the next `start` instead of allocating
    spare: Option<FiberStack>,
    stack_size: usize,
    allocator: Arc<dyn StackAllocator>,
}

// The context is only touched by the thread currently resuming it, and
// resume refuses to run a coroutine that is already running.
unsafe impl Send for Coroutine {}

impl Coroutine {
    /// Unstarted coroutine with the default stack size and allocator
    pub fn new() -> Self {
        Self::with_allocator(default_allocator(), defaults::STACK_SIZE)
    }

    pub fn with_stack_size(stack_size: usize) -> Self {
        Self::with_allocator(default_allocator(), stack_size)
    }

    pub fn with_allocator(allocator: Arc<dyn StackAllocator>, stack_size: usize) -> Self {
        Self {
            ctx: None,
            spare: None,
            stack_size,
            allocator,
        }
    }

    /// Unstarted coroutine that will run on an existing stack
    pub fn with_stack(stack: FiberStack, allocator: Arc<dyn StackAllocator>) -> Self {
        Self {
            ctx: None,
            stack_size: stack.size(),
            spare: Some(stack),
            allocator,
        }
    }

    /// Create the execution context; `entry` runs at the first `resume`
    ///
    /// No effect if the coroutine was already started.
    pub fn start<F>(&mut self, entry: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.ctx.is_some() {
            return Ok(());
        }

        let stack = match self.spare.take() {
            Some(stack) => stack,
            None => FiberStack::new(&self.allocator, self.stack_size)?,
        };

        let mut ctx = Box::new(CoroutineContext {
            regs: SavedRegs::ZERO,
            caller: ptr::null_mut(),
            state: AtomicU8::new(CoroutineState::Suspended.into()),
            entry: Some(Box::new(entry)),
            panic: None,
            stack,
        });

        let raw: *mut CoroutineContext = &mut *ctx;
        unsafe {
            let top = (*raw).stack.top();
            init_context(&mut (*raw).regs, top, coroutine_main, raw as usize);
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    /// Run the coroutine until it yields or finishes
    ///
    /// Returns false (and does nothing) if it was never started or has
    /// already finished.
    ///
    /// # Panics
    ///
    /// If the coroutine is running right now, on this or any other thread.
    pub fn resume(&mut self) -> bool {
        let Some(ctx) = self.ctx.as_mut() else {
            return false;
        };

        match ctx.state.compare_exchange(
            CoroutineState::Suspended.into(),
            CoroutineState::Running.into(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(s) if CoroutineState::from(s) == CoroutineState::Running => {
                panic!("Coroutine::resume: coroutine is already running")
            }
            Err(_) => return false,
        }

        let raw: *mut CoroutineContext = &mut **ctx;
        let parent = tls::current_coroutine();
        let caller = if parent.is_null() {
            tls::root_regs()
        } else {
            unsafe { &mut (*parent).regs as *mut SavedRegs }
        };

        unsafe {
            (*raw).caller = caller;
            tls::set_current_coroutine(raw);
            switch_context(caller, &(*raw).regs);
            tls::set_current_coroutine(parent);

            // Published only now, once the registers are saved, so another
            // thread cannot pick the coroutine up half-switched.
            let _ = (*raw).state.compare_exchange(
                CoroutineState::Running.into(),
                CoroutineState::Suspended.into(),
                Ordering::Release,
                Ordering::Relaxed,
            );
        }
        true
    }

    /// Switch from the coroutine running on this thread back to its caller
    ///
    /// No-op when called outside any coroutine.
    pub fn yield_now() {
        let current = tls::current_coroutine();
        if current.is_null() {
            return;
        }
        unsafe {
            switch_context(&mut (*current).regs, (*current).caller);
        }
    }

    /// True while called from inside some coroutine
    pub fn is_inside() -> bool {
        !tls::current_coroutine().is_null()
    }

    /// True if started and not finished
    pub fn status(&self) -> bool {
        self.state().is_live()
    }

    pub fn state(&self) -> CoroutineState {
        match &self.ctx {
            Some(ctx) => ctx.state(),
            None => CoroutineState::Unstarted,
        }
    }

    /// Panic payload of an entry that unwound, if any
    pub fn take_panic(&mut self) -> Option<Box<dyn Any + Send + 'static>> {
        self.ctx.as_mut().and_then(|ctx| ctx.panic.take())
    }

    /// Drop the execution context and hand back its stack
    ///
    /// The coroutine becomes Unstarted. Releasing a suspended coroutine
    /// discards its frames without running their destructors.
    ///
    /// # Panics
    ///
    /// If the coroutine is running.
    pub fn release(&mut self) -> Option<FiberStack> {
        let Some(ctx) = self.ctx.take() else {
            return self.spare.take();
        };
        match ctx.state() {
            CoroutineState::Running => panic!("Coroutine::release: coroutine is running"),
            CoroutineState::Suspended => {
                jobfiber_core::kdebug!("releasing a suspended coroutine; its frames are discarded")
            }
            _ => {}
        }
        let CoroutineContext { stack, .. } = *ctx;
        Some(stack)
    }

    #[inline]
    pub(crate) fn context_ptr(&mut self) -> *mut CoroutineContext {
        match self.ctx.as_mut() {
            Some(ctx) => &mut **ctx,
            None => ptr::null_mut(),
        }
    }
}

impl Default for Coroutine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.state())
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

/// Runs on the coroutine's own stack; never returns
extern "C" fn coroutine_main(arg: usize) -> ! {
    let ctx = arg as *mut CoroutineContext;
    unsafe {
        if let Some(entry) = (*ctx).entry.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                (*ctx).panic = Some(payload);
            }
        }
        (*ctx).set_state(CoroutineState::Finished);
        switch_context(&mut (*ctx).regs, (*ctx).caller);
    }
    // resume() never switches into a finished coroutine
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_unstarted_resume_is_noop() {
        let mut co = Coroutine::new();
        assert!(!co.status());
        assert!(!co.resume());
        assert_eq!(co.state(), CoroutineState::Unstarted);
    }

    #[test]
    fn test_locals_survive_yield() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&trace);

        let mut co = Coroutine::with_stack_size(64 * 1024);
        co.start(move || {
            let mut local = 10;
            for step in 0..3 {
                t.lock().unwrap().push(local + step);
                local *= 2;
                Coroutine::yield_now();
            }
        })
        .unwrap();

        assert!(co.status());
        for _ in 0..3 {
            assert!(co.resume());
            assert!(co.status());
        }
        assert!(co.resume());
        assert!(!co.status());
        assert_eq!(co.state(), CoroutineState::Finished);
        assert!(!co.resume());
        assert!(!co.status());

        assert_eq!(*trace.lock().unwrap(), vec![10, 21, 42]);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut co = Coroutine::new();
        let r = Arc::clone(&runs);
        co.start(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let r = Arc::clone(&runs);
        co.start(move || {
            r.fetch_add(100, Ordering::SeqCst);
        })
        .unwrap();

        while co.resume() {}
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_yield_outside_is_noop() {
        assert!(!Coroutine::is_inside());
        Coroutine::yield_now();
    }

    #[test]
    fn test_nested_resume_returns_to_parent() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let t_outer = Arc::clone(&trace);

        let mut outer = Coroutine::new();
        outer
            .start(move || {
                let t_inner = Arc::clone(&t_outer);
                let mut inner = Coroutine::new();
                inner
                    .start(move || {
                        t_inner.lock().unwrap().push("inner-1");
                        Coroutine::yield_now();
                        t_inner.lock().unwrap().push("inner-2");
                    })
                    .unwrap();

                inner.resume();
                t_outer.lock().unwrap().push("outer-1");
                Coroutine::yield_now();
                inner.resume();
                t_outer.lock().unwrap().push("outer-2");
                assert!(!inner.status());
            })
            .unwrap();

        outer.resume();
        trace.lock().unwrap().push("root");
        outer.resume();
        assert!(!outer.status());
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["inner-1", "outer-1", "root", "inner-2", "outer-2"]
        );
    }

    #[test]
    fn test_panic_is_captured() {
        let mut co = Coroutine::new();
        co.start(|| panic!("job exploded")).unwrap();
        assert!(co.resume());
        assert_eq!(co.state(), CoroutineState::Finished);

        let payload = co.take_panic().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"job exploded"));
    }

    #[test]
    fn test_migrates_between_threads() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);

        let mut co = Coroutine::new();
        co.start(move || {
            s.lock().unwrap().push(crate::thread::current_id());
            Coroutine::yield_now();
            s.lock().unwrap().push(crate::thread::current_id());
        })
        .unwrap();

        assert!(co.resume());
        let co = std::thread::spawn(move || {
            assert!(co.resume());
            co
        })
        .join()
        .unwrap();
        assert!(!co.status());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], crate::thread::current_id());
        assert_ne!(seen[0], seen[1]);
    }

    #[test]
    fn test_release_returns_stack_for_reuse() {
        let allocator = default_allocator();
        let mut co = Coroutine::with_allocator(Arc::clone(&allocator), 32 * 1024);
        co.start(|| {}).unwrap();
        co.resume();

        let stack = co.release().unwrap();
        assert_eq!(co.state(), CoroutineState::Unstarted);

        let mut again = Coroutine::with_stack(stack, allocator);
        again.start(|| {}).unwrap();
        assert!(again.resume());
        assert!(!again.status());
    }
}
