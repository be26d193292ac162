//! atomic-insert-map: a fixed-capacity, insert-only, lock-free hash
//! map for threads that insert and look up concurrently without
//! blocking each other.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: make the publication of a new entry the *only* point of
//!   inter-thread coordination, so lookups are wait-free per read and
//!   inserts spin only on real contention for one bucket.
//! - Layers:
//!   - `bits`: power-of-two sizing helpers for the bucket table.
//!   - `backing::Region`: contiguous, zero-initialized, non-moving
//!     memory (heap or anonymous mmap, optionally huge-page-backed);
//!     allocated exactly twice, at construction.
//!   - `index::SlotIndex`: closed set of index widths (u16/u32/u64),
//!     each with its atomic twin; links are indices, not pointers.
//!   - `map::AtomicInsertMap`: slot arena + atomic bucket table +
//!     monotonic allocator + the insert/lookup/iterate protocols.
//!   - `cell::{MutAtom, MutCell}`: the two post-publication value
//!     mutation policies (atomic vs caller-serialized).
//!
//! Constraints
//! - Capacity fixed at construction; no deletion, no resizing, no
//!   memory reclamation, no heap allocation after construction.
//! - No locks anywhere; the only retry loop is the publication CAS.
//! - Index-based chains into a non-moving arena: no use-after-free or
//!   ABA hazards to manage, and "no slot" is the reserved index 0.
//!
//! Memory ordering contract
//! - Publication is a release CAS on a bucket's chain head; every read
//!   of a chain head, a next-link, or a slot's published-state byte is
//!   an acquire. Constructor completion therefore happens-before any
//!   observer's view of the entry. Nothing is promised across distinct
//!   slots' values beyond what the chosen mutation wrapper documents.
//!
//! Uniqueness
//! - Strict: the publication loop re-scans its chain after every head
//!   re-read, so two racing inserts of one key publish one entry. The
//!   race loser permanently consumes a slot of capacity.
//!
//! Notes and non-goals
//! - Iteration order is allocation order, an incidental insertion-order
//!   traversal; an iterator snapshots the allocated count at creation.
//! - No FIFO fairness under contention, no persistence, no instrumentation.
//! - `len()` counts allocated slots, an upper bound on published
//!   entries (abandoned slots from lost same-key races or panicking
//!   value constructors are counted but never visible).
//! - Public surface is `AtomicInsertMap` with `SlotRef`/`Iter`, the
//!   mutation wrappers, and the construction options; `bits` and
//!   `backing` are exposed for reuse but carry no map semantics.

pub mod backing;
pub mod bits;
mod cell;
mod index;
mod map;

// Public surface
pub use backing::Storage;
pub use cell::{AtomicPrimitive, MutAtom, MutCell};
pub use index::SlotIndex;
pub use map::{AtomicInsertMap, AtomicInsertMap64, InsertError, Iter, MapOptions, SlotRef};
