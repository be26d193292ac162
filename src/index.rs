//! Slot-index widths and their atomic representations.
//!
//! Links between slots are indices into the arena, not pointers, so
//! the width of an index decides both the maximum capacity and the
//! footprint of every slot and bucket. The set of widths is closed:
//! `u16`, `u32` (the default) and `u64`, each paired with its
//! `core::sync::atomic` type. All trait methods speak `usize` so the
//! map never converts at call sites; the conversions live here.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// An unsigned integer usable as a slot index, with an atomic twin.
///
/// Index 0 is reserved as the "no slot" sentinel, so a width `I`
/// supports capacities up to `I::MAX_INDEX`.
pub trait SlotIndex: Copy + Eq + sealed::Sealed + 'static {
    /// The matching `core::sync::atomic` type. All-zero bytes must be
    /// a valid representation of the sentinel (they are, for every
    /// integer atomic), because regions arrive zero-initialized.
    type Atom: Send + Sync;

    /// Largest representable index.
    const MAX_INDEX: usize;

    fn load(a: &Self::Atom, order: Ordering) -> usize;
    fn store(a: &Self::Atom, idx: usize, order: Ordering);
    /// Single CAS attempt; spurious failure allowed (callers loop).
    fn compare_exchange_weak(
        a: &Self::Atom,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> bool;
}

macro_rules! slot_index {
    ($($int:ty => $atom:ty),* $(,)?) => {
        $(
            impl SlotIndex for $int {
                type Atom = $atom;

                const MAX_INDEX: usize = {
                    // Clamp for targets where usize is narrower.
                    let max = <$int>::MAX as u128;
                    let ceil = usize::MAX as u128;
                    if max < ceil { max as usize } else { usize::MAX }
                };

                #[inline]
                fn load(a: &Self::Atom, order: Ordering) -> usize {
                    a.load(order) as usize
                }

                #[inline]
                fn store(a: &Self::Atom, idx: usize, order: Ordering) {
                    debug_assert!(idx <= Self::MAX_INDEX);
                    a.store(idx as $int, order);
                }

                #[inline]
                fn compare_exchange_weak(
                    a: &Self::Atom,
                    current: usize,
                    new: usize,
                    success: Ordering,
                    failure: Ordering,
                ) -> bool {
                    debug_assert!(new <= Self::MAX_INDEX);
                    a.compare_exchange_weak(current as $int, new as $int, success, failure)
                        .is_ok()
                }
            }
        )*
    };
}

slot_index! {
    u16 => AtomicU16,
    u32 => AtomicU32,
    u64 => AtomicU64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

    #[test]
    fn zeroed_atom_reads_as_sentinel() {
        let a: <u32 as SlotIndex>::Atom = unsafe { core::mem::zeroed() };
        assert_eq!(<u32 as SlotIndex>::load(&a, Relaxed), 0);
    }

    #[test]
    fn store_then_load_round_trips() {
        let a = AtomicU16::new(0);
        <u16 as SlotIndex>::store(&a, 7, Release);
        assert_eq!(<u16 as SlotIndex>::load(&a, Acquire), 7);
    }

    #[test]
    fn cas_swings_only_from_expected() {
        let a = AtomicU64::new(3);
        assert!(!<u64 as SlotIndex>::compare_exchange_weak(
            &a, 4, 9, Release, Relaxed
        ));
        // Weak CAS may fail spuriously, so retry as real callers do.
        while !<u64 as SlotIndex>::compare_exchange_weak(&a, 3, 9, Release, Relaxed) {
            assert_eq!(<u64 as SlotIndex>::load(&a, Relaxed), 3);
        }
        assert_eq!(<u64 as SlotIndex>::load(&a, Relaxed), 9);
    }

    #[test]
    fn max_index_matches_width() {
        assert_eq!(<u16 as SlotIndex>::MAX_INDEX, u16::MAX as usize);
        assert_eq!(<u32 as SlotIndex>::MAX_INDEX, u32::MAX as usize);
    }
}
