//! Coroutine stack allocation
//!
//! Stacks come from a pluggable [`StackAllocator`]. The default maps
//! anonymous memory with a `PROT_NONE` guard page at the low end so an
//! overflow faults instead of corrupting a neighbour.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::{page_size, MmapStackAllocator};
    } else {
        compile_error!("jobfiber stacks require a unix target");
    }
}

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use jobfiber_core::MemoryError;

/// Memory handed out by a [`StackAllocator`]
///
/// `base..base + len` is the whole mapping (guard included); the stack
/// grows down from `base + len`.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    pub base: NonNull<u8>,
    pub len: usize,
}

/// Source of coroutine stacks
pub trait StackAllocator: Send + Sync + fmt::Debug {
    /// Allocate a region with at least `size` usable bytes
    fn allocate(&self, size: usize) -> Result<StackRegion, MemoryError>;

    /// Return a region obtained from `allocate` on this allocator
    ///
    /// # Safety
    ///
    /// `region` must come from this allocator and no context may still be
    /// running on it.
    unsafe fn deallocate(&self, region: StackRegion);
}

/// The allocator used when none is configured
pub fn default_allocator() -> Arc<dyn StackAllocator> {
    Arc::new(MmapStackAllocator)
}

/// Stack from the global heap, without a guard page
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStackAllocator;

const HEAP_STACK_ALIGN: usize = 16;

impl StackAllocator for HeapStackAllocator {
    fn allocate(&self, size: usize) -> Result<StackRegion, MemoryError> {
        let layout = Layout::from_size_align(size, HEAP_STACK_ALIGN)
            .map_err(|_| MemoryError::InvalidStackSize(size))?;
        if layout.size() == 0 {
            return Err(MemoryError::InvalidStackSize(size));
        }
        let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(MemoryError::AllocationFailed)?;
        Ok(StackRegion { base, len: size })
    }

    unsafe fn deallocate(&self, region: StackRegion) {
        let layout = Layout::from_size_align_unchecked(region.len, HEAP_STACK_ALIGN);
        alloc::dealloc(region.base.as_ptr(), layout);
    }
}

/// An owned stack; returned to its allocator on drop
pub struct FiberStack {
    region: StackRegion,
    size: usize,
    allocator: Arc<dyn StackAllocator>,
}

// The region is exclusively owned; it is only touched by the context
// running on it.
unsafe impl Send for FiberStack {}

impl FiberStack {
    pub fn new(allocator: &Arc<dyn StackAllocator>, size: usize) -> Result<Self, MemoryError> {
        let region = allocator.allocate(size)?;
        Ok(Self {
            region,
            size,
            allocator: Arc::clone(allocator),
        })
    }

    /// Highest address; the initial stack pointer is derived from it
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.region.base.as_ptr().add(self.region.len) }
    }

    /// Usable size requested at allocation
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberStack")
            .field("base", &self.region.base)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe { self.allocator.deallocate(self.region) };
    }
}

/// Idle stacks shared by the workers of one job system
///
/// Holds at most `capacity` stacks; surplus stacks go back to the
/// allocator when returned.
pub(crate) struct StackPool {
    allocator: Arc<dyn StackAllocator>,
    stack_size: usize,
    idle: Option<ArrayQueue<FiberStack>>,
}

impl StackPool {
    pub fn new(allocator: Arc<dyn StackAllocator>, stack_size: usize, capacity: usize) -> Self {
        Self {
            allocator,
            stack_size,
            idle: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    pub fn allocator(&self) -> &Arc<dyn StackAllocator> {
        &self.allocator
    }

    /// An idle stack, or a freshly allocated one
    pub fn take(&self) -> Result<FiberStack, MemoryError> {
        match self.idle.as_ref().and_then(ArrayQueue::pop) {
            Some(stack) => Ok(stack),
            None => FiberStack::new(&self.allocator, self.stack_size),
        }
    }

    /// One stack per job, all or nothing
    pub fn take_many(&self, count: usize) -> Result<Vec<FiberStack>, MemoryError> {
        let mut stacks = Vec::with_capacity(count);
        for _ in 0..count {
            match self.take() {
                Ok(stack) => stacks.push(stack),
                Err(e) => {
                    stacks.into_iter().for_each(|stack| self.give(stack));
                    return Err(e);
                }
            }
        }
        Ok(stacks)
    }

    pub fn give(&self, stack: FiberStack) {
        if let Some(idle) = &self.idle {
            // Full pool: the rejected stack is dropped and unmapped
            let _ = idle.push(stack);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Heap stacks, but only `limit` of them alive at once
    #[derive(Debug)]
    struct Limited {
        live: AtomicUsize,
        limit: usize,
    }

    impl StackAllocator for Limited {
        fn allocate(&self, size: usize) -> Result<StackRegion, MemoryError> {
            if self.live.fetch_add(1, Ordering::SeqCst) >= self.limit {
                self.live.fetch_sub(1, Ordering::SeqCst);
                return Err(MemoryError::AllocationFailed);
            }
            HeapStackAllocator.allocate(size)
        }

        unsafe fn deallocate(&self, region: StackRegion) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            HeapStackAllocator.deallocate(region);
        }
    }

    #[test]
    fn test_pool_reuses_and_bounds() {
        let limited = Arc::new(Limited { live: AtomicUsize::new(0), limit: 3 });
        let pool = StackPool::new(limited.clone(), 16 * 1024, 1);

        let a = pool.take().unwrap();
        let b = pool.take().unwrap();
        pool.give(a);
        pool.give(b);
        // One kept, one returned to the allocator
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(limited.live.load(Ordering::SeqCst), 1);

        let _reused = pool.take().unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(limited.live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_many_is_all_or_nothing() {
        let limited = Arc::new(Limited { live: AtomicUsize::new(0), limit: 2 });
        let pool = StackPool::new(limited.clone(), 16 * 1024, 4);

        assert_eq!(pool.take_many(3).unwrap_err(), MemoryError::AllocationFailed);
        // The two that did allocate are parked in the pool
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.take_many(2).map(|s| s.len()), Ok(2));
    }

    fn touch_top(stack: &FiberStack) {
        unsafe {
            let p = stack.top().sub(8);
            p.write_volatile(0xAB);
            assert_eq!(p.read_volatile(), 0xAB);
        }
    }

    #[test]
    fn test_mmap_stack() {
        let allocator = default_allocator();
        let stack = FiberStack::new(&allocator, 64 * 1024).unwrap();
        assert_eq!(stack.size(), 64 * 1024);
        assert_eq!(stack.top() as usize % page_size(), 0);
        touch_top(&stack);
    }

    #[test]
    fn test_heap_stack() {
        let allocator: Arc<dyn StackAllocator> = Arc::new(HeapStackAllocator);
        let stack = FiberStack::new(&allocator, 32 * 1024).unwrap();
        assert_eq!(stack.top() as usize % HEAP_STACK_ALIGN, 0);
        touch_top(&stack);

        assert_eq!(
            allocator.allocate(0).unwrap_err(),
            MemoryError::InvalidStackSize(0)
        );
    }
}
