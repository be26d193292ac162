//! AtomicInsertMap: the arena, the bucket table, and the protocols
//! that tie them together.
//!
//! Layout: one region holds `capacity + 1` slots (slot 0 is the
//! reserved sentinel, never used), the other holds a power-of-two
//! number of atomic chain-head indices. Both are zero-initialized and
//! never move, so a slot index is a stable name for an entry for the
//! whole lifetime of the map.
//!
//! Publication protocol: a slot is claimed from the monotonic
//! allocator, filled in while exclusively owned, then spliced onto its
//! bucket's chain with a release CAS on the chain head. The CAS is the
//! single visibility point: any thread that acquire-loads the head (or
//! a next-link, or the slot's LINKED state byte) afterwards also
//! observes the fully constructed key and value. Lookups walk chains
//! with acquire loads and never retry; the only spin in the design is
//! the publication CAS under contention on one bucket.
//!
//! Uniqueness is strict: the publication loop re-scans the chain every
//! time it re-reads the head, so concurrent inserts of the same key
//! publish exactly one entry. The loser of such a race permanently
//! consumes its allocated slot (the index is never reused; there is no
//! reclamation of any kind).

use crate::backing::{Region, Storage};
use crate::bits;
use crate::index::SlotIndex;
use core::borrow::Borrow;
use core::cell::UnsafeCell;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::alloc::Layout;
use std::collections::hash_map::RandomState;
use std::io;

/// Slot state byte. Zero (the zero-init default) covers both "never
/// allocated" and "allocated but abandoned before publication"; only
/// LINKED slots hold initialized key/value pairs as far as iteration
/// and teardown are concerned.
const LINKED: u8 = 1;

struct Slot<K, V, I: SlotIndex> {
    state: AtomicU8,
    next: I::Atom,
    key: UnsafeCell<MaybeUninit<K>>,
    value: UnsafeCell<MaybeUninit<V>>,
}

/// Insertion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// Every slot has been allocated. Permanent: entries are never
    /// removed, so the map can only be replaced by a larger one.
    CapacityExhausted,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::CapacityExhausted => f.write_str("map capacity exhausted"),
        }
    }
}

impl std::error::Error for InsertError {}

/// Construction-time options.
///
/// `load_factor` must be in `(0, 1]` and bounds the expected chain
/// length: the bucket table is sized to the next power of two at or
/// above `capacity / load_factor`.
pub struct MapOptions<S = RandomState> {
    capacity: usize,
    load_factor: f32,
    storage: Storage,
    hasher: S,
}

impl MapOptions<RandomState> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            load_factor: 1.0,
            storage: Storage::Heap,
            hasher: RandomState::new(),
        }
    }
}

impl<S> MapOptions<S> {
    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.load_factor = load_factor;
        self
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    pub fn hasher<S2: BuildHasher>(self, hasher: S2) -> MapOptions<S2> {
        MapOptions {
            capacity: self.capacity,
            load_factor: self.load_factor,
            storage: self.storage,
            hasher,
        }
    }
}

/// A fixed-capacity, insert-only, lock-free hash map.
///
/// Many threads may insert and look up through a shared reference
/// concurrently; there are no locks, no blocking, and no allocation
/// after construction. Entries are never removed, and references
/// returned by [`find`](Self::find) or [`insert`](Self::insert) stay
/// valid for the lifetime of the map.
///
/// `I` selects the slot-index width (`u16`, `u32`, `u64`) and with it
/// the maximum capacity and the per-slot footprint;
/// [`AtomicInsertMap64`] is the wide alias.
pub struct AtomicInsertMap<K, V, S = RandomState, I: SlotIndex = u32> {
    hasher: S,
    slots: Region,
    buckets: Region,
    capacity: usize,
    bucket_mask: usize,
    allocated: AtomicUsize,
    _marker: PhantomData<(K, V, I)>,
}

/// `AtomicInsertMap` with `u64` slot indices, for very large tables.
pub type AtomicInsertMap64<K, V, S = RandomState> = AtomicInsertMap<K, V, S, u64>;

unsafe impl<K: Send, V: Send, S: Send, I: SlotIndex> Send for AtomicInsertMap<K, V, S, I> {}
// Insertion moves keys and values in through `&self`, so Sync needs
// Send on both in addition to Sync.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync, I: SlotIndex> Sync
    for AtomicInsertMap<K, V, S, I>
{
}

impl<K, V> AtomicInsertMap<K, V>
where
    K: Eq + Hash,
{
    /// Heap-backed map with load factor 1.0.
    pub fn new(capacity: usize) -> Self {
        Self::with_load_factor(capacity, 1.0)
    }

    /// Heap-backed map with an explicit load factor in `(0, 1]`.
    pub fn with_load_factor(capacity: usize, load_factor: f32) -> Self {
        let opts = MapOptions::new(capacity).load_factor(load_factor);
        match Self::with_options(opts) {
            Ok(map) => map,
            // Heap allocation failure aborts inside Region::zeroed.
            Err(_) => unreachable!("heap-backed construction does not fail"),
        }
    }
}

impl<K, V, S, I> AtomicInsertMap<K, V, S, I>
where
    I: SlotIndex,
{
    /// Number of slots allocated so far.
    ///
    /// This is an upper bound on the number of published entries: an
    /// insert that lost a same-key race, or whose value constructor
    /// panicked, consumes a slot without publishing it.
    pub fn len(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of slots this map can ever allocate.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of the bucket table (diagnostic).
    pub fn bucket_count(&self) -> usize {
        self.bucket_mask + 1
    }

    /// Iterates entries in allocation (insertion) order.
    ///
    /// The iterator snapshots the allocated count at creation; entries
    /// published afterwards are not guaranteed to be visited. Slots
    /// allocated but not (yet) published are skipped.
    pub fn iter(&self) -> Iter<'_, K, V, S, I> {
        Iter {
            map: self,
            idx: 1,
            end: self.allocated.load(Ordering::Acquire),
        }
    }

    #[inline]
    fn slot(&self, idx: usize) -> &Slot<K, V, I> {
        debug_assert!(idx >= 1 && idx <= self.capacity);
        unsafe { &*(self.slots.as_ptr() as *const Slot<K, V, I>).add(idx) }
    }

    #[inline]
    fn bucket_head(&self, bucket: usize) -> &I::Atom {
        debug_assert!(bucket <= self.bucket_mask);
        unsafe { &*(self.buckets.as_ptr() as *const I::Atom).add(bucket) }
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & self.bucket_mask
    }

    #[inline]
    fn slot_ref(&self, idx: usize) -> SlotRef<'_, K, V, S, I> {
        SlotRef { map: self, idx }
    }

    /// Key of a slot reachable from a chain. Chain membership implies
    /// the slot was published, which implies the key is initialized.
    #[inline]
    unsafe fn key_unchecked(&self, idx: usize) -> &K {
        (*self.slot(idx).key.get()).assume_init_ref()
    }

    /// Claims the next slot index, or reports permanent exhaustion.
    /// A failed claim mutates nothing.
    fn allocate(&self) -> Result<usize, InsertError> {
        let mut n = self.allocated.load(Ordering::Relaxed);
        loop {
            if n == self.capacity {
                return Err(InsertError::CapacityExhausted);
            }
            // Relaxed is enough: the counter guards no data, slot
            // contents are synchronized by publication.
            match self.allocated.compare_exchange_weak(
                n,
                n + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(n + 1),
                Err(cur) => n = cur,
            }
        }
    }
}

impl<K, V, S, I> AtomicInsertMap<K, V, S, I>
where
    K: Eq + Hash,
    S: BuildHasher,
    I: SlotIndex,
{
    /// Builds a map from [`MapOptions`]. Only mmap-backed storage can
    /// actually fail; the error is the underlying `io::Error`.
    ///
    /// # Panics
    ///
    /// If the load factor is outside `(0, 1]` or the capacity is not
    /// representable in the index type `I`.
    pub fn with_options(opts: MapOptions<S>) -> io::Result<Self> {
        let MapOptions {
            capacity,
            load_factor,
            storage,
            hasher,
        } = opts;
        assert!(
            load_factor > 0.0 && load_factor <= 1.0,
            "load factor must be in (0, 1], got {load_factor}"
        );
        assert!(
            capacity <= I::MAX_INDEX,
            "capacity {capacity} exceeds the index type's maximum {}",
            I::MAX_INDEX
        );

        let wanted = ((capacity as f64) / (load_factor as f64)).ceil() as u64;
        let num_buckets = bits::next_pow_two(wanted.max(1));
        assert!(
            num_buckets <= usize::MAX as u64,
            "bucket table does not fit the address space"
        );
        let num_buckets = num_buckets as usize;

        let slot_layout =
            Layout::array::<Slot<K, V, I>>(capacity + 1).expect("slot arena layout overflow");
        let bucket_layout =
            Layout::array::<I::Atom>(num_buckets).expect("bucket table layout overflow");

        // Zeroed memory is a valid arena: state EMPTY, links and chain
        // heads at the sentinel, keys/values uninitialized.
        let slots = Region::zeroed(slot_layout, storage)?;
        let buckets = Region::zeroed(bucket_layout, storage)?;

        Ok(Self {
            hasher,
            slots,
            buckets,
            capacity,
            bucket_mask: num_buckets - 1,
            allocated: AtomicUsize::new(0),
            _marker: PhantomData,
        })
    }

    /// Walks a chain starting at `idx`, acquire-loading each link.
    fn scan_from<Q>(&self, mut idx: usize, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        while idx != 0 {
            let slot = self.slot(idx);
            if unsafe { self.key_unchecked(idx) }.borrow() == q {
                return Some(idx);
            }
            idx = I::load(&slot.next, Ordering::Acquire);
        }
        None
    }

    fn scan_chain<Q>(&self, bucket: usize, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let head = I::load(self.bucket_head(bucket), Ordering::Acquire);
        self.scan_from(head, q)
    }

    /// Inserts `key → value`, or returns the already-published entry.
    ///
    /// Returns the entry's [`SlotRef`] and whether this call published
    /// it. Fails only with [`InsertError::CapacityExhausted`]. If an
    /// equal key is already present no slot is allocated; under a
    /// same-key race exactly one insert publishes, and the other
    /// returns `(existing, false)` after consuming one slot of
    /// capacity.
    pub fn insert(&self, key: K, value: V) -> Result<(SlotRef<'_, K, V, S, I>, bool), InsertError> {
        self.insert_with(key, move || value)
    }

    /// Like [`insert`](Self::insert), but builds the value lazily.
    ///
    /// `make` runs only after a slot has been allocated; the
    /// existing-key fast path never runs it. If `make` panics, the
    /// allocated slot is permanently abandoned — never linked, never
    /// visible to lookups or iteration — and the panic propagates.
    pub fn insert_with<F>(
        &self,
        key: K,
        make: F,
    ) -> Result<(SlotRef<'_, K, V, S, I>, bool), InsertError>
    where
        F: FnOnce() -> V,
    {
        let bucket = self.bucket_of(self.hasher.hash_one(&key));
        if let Some(existing) = self.scan_chain(bucket, &key) {
            return Ok((self.slot_ref(existing), false));
        }

        let idx = self.allocate()?;
        // A panic in make() unwinds with `key` still on this frame;
        // the claimed slot stays EMPTY and is simply never published.
        let value = make();

        let slot = self.slot(idx);
        // The slot is exclusively ours until the CAS below: its index
        // has never been handed to anyone else.
        unsafe {
            (*slot.key.get()).write(key);
            (*slot.value.get()).write(value);
        }

        let head_atom = self.bucket_head(bucket);
        loop {
            let head = I::load(head_atom, Ordering::Acquire);
            let raced = {
                let key_ref = unsafe { self.key_unchecked(idx) };
                self.scan_from(head, key_ref)
            };
            if let Some(existing) = raced {
                // Lost a same-key race. Tear down the orphan in place;
                // EMPTY state keeps it invisible to iteration/teardown.
                unsafe {
                    ptr::drop_in_place((*slot.key.get()).as_mut_ptr());
                    ptr::drop_in_place((*slot.value.get()).as_mut_ptr());
                }
                return Ok((self.slot_ref(existing), false));
            }
            I::store(&slot.next, head, Ordering::Relaxed);
            // Release: everything written above becomes visible to any
            // thread that acquires the new head.
            if I::compare_exchange_weak(head_atom, head, idx, Ordering::Release, Ordering::Relaxed)
            {
                slot.state.store(LINKED, Ordering::Release);
                return Ok((self.slot_ref(idx), true));
            }
        }
    }

    /// Looks up `q`, returning a stable reference to the entry.
    ///
    /// Wait-free per link read; never blocks writers, never retries.
    pub fn find<Q>(&self, q: &Q) -> Option<SlotRef<'_, K, V, S, I>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let bucket = self.bucket_of(self.hasher.hash_one(q));
        self.scan_chain(bucket, q).map(|idx| self.slot_ref(idx))
    }

    /// Value lookup shorthand.
    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).map(|r| r.value())
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }
}

impl<K, V, S, I: SlotIndex> Drop for AtomicInsertMap<K, V, S, I> {
    fn drop(&mut self) {
        if !core::mem::needs_drop::<K>() && !core::mem::needs_drop::<V>() {
            return;
        }
        // &mut self: all concurrent use has been joined by the caller.
        let n = *self.allocated.get_mut();
        for idx in 1..=n {
            let slot = self.slot(idx);
            if slot.state.load(Ordering::Relaxed) == LINKED {
                unsafe {
                    ptr::drop_in_place((*slot.key.get()).as_mut_ptr());
                    ptr::drop_in_place((*slot.value.get()).as_mut_ptr());
                }
            }
        }
    }
}

/// A stable reference to one published entry.
///
/// Cheap to copy; valid for the lifetime of the map (entries are never
/// removed). Two `SlotRef`s are equal iff they name the same slot of
/// the same map.
pub struct SlotRef<'a, K, V, S = RandomState, I: SlotIndex = u32> {
    map: &'a AtomicInsertMap<K, V, S, I>,
    idx: usize,
}

impl<'a, K, V, S, I: SlotIndex> SlotRef<'a, K, V, S, I> {
    /// The entry's key. Immutable for the life of the map.
    pub fn key(&self) -> &'a K {
        unsafe { (*self.map.slot(self.idx).key.get()).assume_init_ref() }
    }

    /// The entry's value. Mutate through a wrapper policy
    /// ([`MutAtom`](crate::MutAtom) / [`MutCell`](crate::MutCell)) if
    /// post-publication mutation is needed.
    pub fn value(&self) -> &'a V {
        unsafe { (*self.map.slot(self.idx).value.get()).assume_init_ref() }
    }

    /// The underlying slot index (diagnostic; 1-based, never 0).
    pub fn slot_index(&self) -> usize {
        self.idx
    }
}

impl<K, V, S, I: SlotIndex> Clone for SlotRef<'_, K, V, S, I> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K, V, S, I: SlotIndex> Copy for SlotRef<'_, K, V, S, I> {}

impl<K, V, S, I: SlotIndex> PartialEq for SlotRef<'_, K, V, S, I> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.map, other.map) && self.idx == other.idx
    }
}
impl<K, V, S, I: SlotIndex> Eq for SlotRef<'_, K, V, S, I> {}

impl<K: fmt::Debug, V: fmt::Debug, S, I: SlotIndex> fmt::Debug for SlotRef<'_, K, V, S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRef")
            .field("slot", &self.idx)
            .field("key", self.key())
            .field("value", self.value())
            .finish()
    }
}

/// Allocation-order iterator over published entries.
pub struct Iter<'a, K, V, S = RandomState, I: SlotIndex = u32> {
    map: &'a AtomicInsertMap<K, V, S, I>,
    idx: usize,
    end: usize,
}

impl<'a, K, V, S, I> Iterator for Iter<'a, K, V, S, I>
where
    I: SlotIndex,
{
    type Item = SlotRef<'a, K, V, S, I>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx <= self.end {
            let i = self.idx;
            self.idx += 1;
            // Acquire pairs with the publisher's release store of
            // LINKED, so a visited slot is fully constructed.
            if self.map.slot(i).state.load(Ordering::Acquire) == LINKED {
                return Some(self.map.slot_ref(i));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some((self.end + 1).saturating_sub(self.idx)))
    }
}

impl<K, V, S, I> core::iter::FusedIterator for Iter<'_, K, V, S, I> where I: SlotIndex {}

impl<'a, K, V, S, I> IntoIterator for &'a AtomicInsertMap<K, V, S, I>
where
    I: SlotIndex,
{
    type Item = SlotRef<'a, K, V, S, I>;
    type IntoIter = Iter<'a, K, V, S, I>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
