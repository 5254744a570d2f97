//! Lock-free integer cells
//!
//! `AtomicCell<T>` wraps a 32- or 64-bit signed integer that is only ever
//! touched through atomic operations. Read-modify-write operations use
//! `AcqRel`, loads use `Acquire` and stores use `Release`: whatever a
//! thread wrote before a decrement is visible to the thread that observes
//! the resulting value. Job counters rely on exactly this.

use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicI64, Ordering};

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// Integer types that have a native atomic representation
///
/// Implemented for `i32` and `i64` only.
pub trait AtomicInt: sealed::Sealed + Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// The std atomic backing this integer
    type Repr: Send + Sync;

    const ONE: Self;

    fn new_repr(v: Self) -> Self::Repr;
    fn load(r: &Self::Repr, order: Ordering) -> Self;
    fn store(r: &Self::Repr, v: Self, order: Ordering);
    fn swap(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn fetch_add(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn fetch_sub(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn fetch_and(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn fetch_or(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn fetch_xor(r: &Self::Repr, v: Self, order: Ordering) -> Self;
    fn compare_exchange(
        r: &Self::Repr,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    fn wrapping_add(self, v: Self) -> Self;
    fn wrapping_sub(self, v: Self) -> Self;
}

macro_rules! impl_atomic_int {
    ($int:ty, $atomic:ty) => {
        impl AtomicInt for $int {
            type Repr = $atomic;

            const ONE: Self = 1;

            #[inline]
            fn new_repr(v: Self) -> Self::Repr {
                <$atomic>::new(v)
            }
            #[inline]
            fn load(r: &Self::Repr, order: Ordering) -> Self {
                r.load(order)
            }
            #[inline]
            fn store(r: &Self::Repr, v: Self, order: Ordering) {
                r.store(v, order)
            }
            #[inline]
            fn swap(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.swap(v, order)
            }
            #[inline]
            fn fetch_add(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.fetch_add(v, order)
            }
            #[inline]
            fn fetch_sub(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.fetch_sub(v, order)
            }
            #[inline]
            fn fetch_and(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.fetch_and(v, order)
            }
            #[inline]
            fn fetch_or(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.fetch_or(v, order)
            }
            #[inline]
            fn fetch_xor(r: &Self::Repr, v: Self, order: Ordering) -> Self {
                r.fetch_xor(v, order)
            }
            #[inline]
            fn compare_exchange(
                r: &Self::Repr,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                r.compare_exchange(current, new, success, failure)
            }
            #[inline]
            fn wrapping_add(self, v: Self) -> Self {
                <$int>::wrapping_add(self, v)
            }
            #[inline]
            fn wrapping_sub(self, v: Self) -> Self {
                <$int>::wrapping_sub(self, v)
            }
        }
    };
}

impl_atomic_int!(i32, AtomicI32);
impl_atomic_int!(i64, AtomicI64);

/// A single atomically-accessed integer
///
/// Natural alignment is guaranteed by the std atomic it wraps.
#[repr(transparent)]
pub struct AtomicCell<T: AtomicInt> {
    repr: T::Repr,
}

/// 32-bit atomic cell
pub type Atomic32 = AtomicCell<i32>;

/// 64-bit atomic cell
pub type Atomic64 = AtomicCell<i64>;

impl<T: AtomicInt> AtomicCell<T> {
    /// Create a new cell holding `value`
    #[inline]
    pub fn new(value: T) -> Self {
        Self { repr: T::new_repr(value) }
    }

    #[inline]
    pub fn load(&self) -> T {
        T::load(&self.repr, Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, value: T) {
        T::store(&self.repr, value, Ordering::Release)
    }

    /// Store `value`, returning the previous value
    #[inline]
    pub fn swap(&self, value: T) -> T {
        T::swap(&self.repr, value, Ordering::AcqRel)
    }

    /// Add one, returning the new value
    #[inline]
    pub fn increment(&self) -> T {
        self.fetch_increment().wrapping_add(T::ONE)
    }

    /// Subtract one, returning the new value
    #[inline]
    pub fn decrement(&self) -> T {
        self.fetch_decrement().wrapping_sub(T::ONE)
    }

    /// Add one, returning the previous value
    #[inline]
    pub fn fetch_increment(&self) -> T {
        T::fetch_add(&self.repr, T::ONE, Ordering::AcqRel)
    }

    /// Subtract one, returning the previous value
    #[inline]
    pub fn fetch_decrement(&self) -> T {
        T::fetch_sub(&self.repr, T::ONE, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_add(&self, value: T) -> T {
        T::fetch_add(&self.repr, value, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_sub(&self, value: T) -> T {
        T::fetch_sub(&self.repr, value, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_and(&self, value: T) -> T {
        T::fetch_and(&self.repr, value, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_or(&self, value: T) -> T {
        T::fetch_or(&self.repr, value, Ordering::AcqRel)
    }

    #[inline]
    pub fn fetch_xor(&self, value: T) -> T {
        T::fetch_xor(&self.repr, value, Ordering::AcqRel)
    }

    /// Replace `current` with `new` if the cell still holds `current`
    ///
    /// Returns the previous value in both cases (`Ok` on success).
    #[inline]
    pub fn compare_exchange(&self, current: T, new: T) -> Result<T, T> {
        T::compare_exchange(&self.repr, current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

impl<T: AtomicInt + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: AtomicInt> fmt::Debug for AtomicCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.load()).finish()
    }
}

// Layout must match the plain integer for embedding in repr(C) owners.
const _: () = {
    assert!(core::mem::size_of::<Atomic32>() == 4);
    assert!(core::mem::align_of::<Atomic32>() == 4);
    assert!(core::mem::size_of::<Atomic64>() == 8);
    assert!(core::mem::align_of::<Atomic64>() == 8);
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pre_and_post_values() {
        let cell = Atomic32::new(5);
        assert_eq!(cell.increment(), 6);
        assert_eq!(cell.fetch_increment(), 6);
        assert_eq!(cell.load(), 7);
        assert_eq!(cell.decrement(), 6);
        assert_eq!(cell.fetch_decrement(), 6);
        assert_eq!(cell.load(), 5);
    }

    #[test]
    fn test_bitwise_ops() {
        let cell = Atomic64::new(0b1100);
        assert_eq!(cell.fetch_or(0b0011), 0b1100);
        assert_eq!(cell.fetch_and(0b1010), 0b1111);
        assert_eq!(cell.fetch_xor(0b1111), 0b1010);
        assert_eq!(cell.load(), 0b0101);
    }

    #[test]
    fn test_swap_and_cas() {
        let cell = Atomic32::new(1);
        assert_eq!(cell.swap(9), 1);
        assert_eq!(cell.compare_exchange(9, 10), Ok(9));
        assert_eq!(cell.compare_exchange(9, 11), Err(10));
        cell.store(-3);
        assert_eq!(cell.fetch_add(4), -3);
        assert_eq!(cell.fetch_sub(2), 1);
        assert_eq!(cell.load(), -1);
    }

    #[test]
    fn test_contended_net_delta() {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(4).max(2);
        let ops = 10_000;
        let cell = Arc::new(Atomic64::new(0));
        let mut handles = vec![];

        for t in 0..threads {
            let cell = Arc::clone(&cell);
            handles.push(thread::spawn(move || {
                for _ in 0..ops {
                    // Even threads add 2 and take 1, odd threads only take 1
                    if t % 2 == 0 {
                        cell.increment();
                        cell.fetch_add(1);
                    }
                    cell.decrement();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let evens = (threads + 1) / 2;
        let expected = (evens * ops * 2) as i64 - (threads * ops) as i64;
        assert_eq!(cell.load(), expected);
    }
}
