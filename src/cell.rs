//! Post-publication value mutation, in two policies.
//!
//! A published slot's key is immutable for the life of the map, but the
//! value half may keep changing. The caller picks one of two wrapper
//! policies at construction time by choosing the map's value type:
//!
//! - [`MutAtom<T>`]: the value lives behind the primitive's atomic
//!   twin; load/store/swap/compare_exchange/fetch_add with a
//!   caller-chosen [`Ordering`] per operation. Safe under concurrent
//!   mutation from any number of threads.
//! - [`MutCell<T>`]: a plain `UnsafeCell`. No intrinsic
//!   synchronization and no implicit fences: cross-thread visibility
//!   is undefined unless the caller externally serializes every access
//!   to that one slot's value (single writer, external lock, ...).
//!
//! Maps whose values never change after insert need neither wrapper;
//! a bare `V` is fine.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32, AtomicU64,
    AtomicU8, AtomicUsize, Ordering,
};

mod sealed {
    pub trait Sealed {}
}

/// An integer primitive with an atomic representation.
///
/// Closed set: the fixed-width and pointer-width integers. Each names
/// its `core::sync::atomic` twin and forwards the operations
/// [`MutAtom`] exposes.
pub trait AtomicPrimitive: Copy + Eq + sealed::Sealed {
    /// The matching atomic type.
    type Atom: Send + Sync;

    fn into_atom(self) -> Self::Atom;
    fn load(a: &Self::Atom, order: Ordering) -> Self;
    fn store(a: &Self::Atom, val: Self, order: Ordering);
    fn swap(a: &Self::Atom, val: Self, order: Ordering) -> Self;
    fn compare_exchange(
        a: &Self::Atom,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    fn fetch_add(a: &Self::Atom, val: Self, order: Ordering) -> Self;
}

macro_rules! atomic_primitive {
    ($($int:ty => $atom:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $int {}

            impl AtomicPrimitive for $int {
                type Atom = $atom;

                #[inline]
                fn into_atom(self) -> Self::Atom {
                    <$atom>::new(self)
                }
                #[inline]
                fn load(a: &Self::Atom, order: Ordering) -> Self {
                    a.load(order)
                }
                #[inline]
                fn store(a: &Self::Atom, val: Self, order: Ordering) {
                    a.store(val, order)
                }
                #[inline]
                fn swap(a: &Self::Atom, val: Self, order: Ordering) -> Self {
                    a.swap(val, order)
                }
                #[inline]
                fn compare_exchange(
                    a: &Self::Atom,
                    current: Self,
                    new: Self,
                    success: Ordering,
                    failure: Ordering,
                ) -> Result<Self, Self> {
                    a.compare_exchange(current, new, success, failure)
                }
                #[inline]
                fn fetch_add(a: &Self::Atom, val: Self, order: Ordering) -> Self {
                    a.fetch_add(val, order)
                }
            }
        )*
    };
}

atomic_primitive! {
    u8 => AtomicU8,
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
    usize => AtomicUsize,
    i8 => AtomicI8,
    i16 => AtomicI16,
    i32 => AtomicI32,
    i64 => AtomicI64,
    isize => AtomicIsize,
}

/// Atomic value wrapper: self-synchronizing mutation of a published
/// slot's value.
pub struct MutAtom<T: AtomicPrimitive> {
    data: T::Atom,
}

impl<T: AtomicPrimitive> MutAtom<T> {
    #[inline]
    pub fn new(val: T) -> Self {
        Self {
            data: val.into_atom(),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> T {
        T::load(&self.data, order)
    }

    #[inline]
    pub fn store(&self, val: T, order: Ordering) {
        T::store(&self.data, val, order)
    }

    #[inline]
    pub fn swap(&self, val: T, order: Ordering) -> T {
        T::swap(&self.data, val, order)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: T,
        new: T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<T, T> {
        T::compare_exchange(&self.data, current, new, success, failure)
    }

    /// Wrapping add; returns the previous value.
    #[inline]
    pub fn fetch_add(&self, val: T, order: Ordering) -> T {
        T::fetch_add(&self.data, val, order)
    }
}

impl<T: AtomicPrimitive> From<T> for MutAtom<T> {
    fn from(val: T) -> Self {
        Self::new(val)
    }
}

impl<T: AtomicPrimitive + fmt::Debug> fmt::Debug for MutAtom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutAtom")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

/// Plain value wrapper: direct mutation, caller-serialized.
///
/// Reads through `get` are safe because the only ways to write through
/// a shared reference are `unsafe` — any data race necessarily passes
/// through an `unsafe` block whose contract the caller accepted.
pub struct MutCell<T> {
    data: UnsafeCell<T>,
}

// Caller-serialized contract: sharing requires only that T may move
// between threads.
unsafe impl<T: Send> Sync for MutCell<T> {}

impl<T> MutCell<T> {
    #[inline]
    pub fn new(val: T) -> Self {
        Self {
            data: UnsafeCell::new(val),
        }
    }

    /// Copies the current value out, with no synchronization.
    #[inline]
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        unsafe { *self.data.get() }
    }

    /// Exclusive access through an exclusive reference.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Raw pointer to the value.
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.data.get()
    }

    /// Mutable access through a shared reference.
    ///
    /// # Safety
    ///
    /// The caller must externally serialize all accesses to this cell:
    /// no other read or write (through any alias) may overlap the
    /// returned borrow. Cross-thread visibility of the write is
    /// undefined unless the caller provides the synchronization.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut(&self) -> &mut T {
        &mut *self.data.get()
    }

    /// Replaces the value through a shared reference.
    ///
    /// # Safety
    ///
    /// Same contract as [`MutCell::as_mut`].
    #[inline]
    pub unsafe fn set(&self, val: T) {
        *self.data.get() = val;
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T> From<T> for MutCell<T> {
    fn from(val: T) -> Self {
        Self::new(val)
    }
}

impl<T: fmt::Debug + Copy> fmt::Debug for MutCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutCell").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst};

    #[test]
    fn atom_load_store_swap() {
        let a = MutAtom::new(5u32);
        assert_eq!(a.load(Acquire), 5);
        a.store(9, Release);
        assert_eq!(a.swap(11, AcqRel), 9);
        assert_eq!(a.load(Relaxed), 11);
    }

    #[test]
    fn atom_compare_exchange() {
        let a = MutAtom::new(1i64);
        assert_eq!(a.compare_exchange(2, 3, SeqCst, SeqCst), Err(1));
        assert_eq!(a.compare_exchange(1, 3, SeqCst, SeqCst), Ok(1));
        assert_eq!(a.load(SeqCst), 3);
    }

    #[test]
    fn atom_fetch_add_accumulates() {
        let a = MutAtom::new(0usize);
        for _ in 0..10 {
            a.fetch_add(3, Relaxed);
        }
        assert_eq!(a.load(Relaxed), 30);
    }

    #[test]
    fn cell_single_threaded_mutation() {
        let c = MutCell::new((1, 2));
        // Single thread, no aliasing borrows: contract trivially holds.
        unsafe { c.as_mut().0 += 1 };
        assert_eq!(c.get(), (2, 2));
        unsafe { c.set((7, 8)) };
        assert_eq!(c.into_inner(), (7, 8));
    }

    #[test]
    fn cell_exclusive_mutation_is_safe() {
        let mut c = MutCell::new(41u8);
        *c.get_mut() += 1;
        assert_eq!(c.get(), 42);
    }
}
