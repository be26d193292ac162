//! Backing storage: contiguous, zero-initialized, non-moving regions.
//!
//! The map allocates exactly two regions at construction — one for the
//! slot arena and one for the bucket table — and never grows, shrinks,
//! or moves them. That stability is what makes index-based links safe:
//! a slot index remains valid for the whole lifetime of the map.
//!
//! Two providers are supported: the global allocator (`Storage::Heap`)
//! and anonymous memory maps (`Storage::Mmap`), the latter optionally
//! huge-page-backed on Linux. Both hand back zeroed memory, which the
//! map relies on for its "index 0 / state 0 = empty" encoding.

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::io;

use memmap2::{MmapMut, MmapOptions};

/// Which provider backs a region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Storage {
    /// Global allocator (`alloc_zeroed`).
    Heap,
    /// Anonymous private memory map.
    Mmap,
    /// Anonymous map backed by huge pages (`MAP_HUGETLB`). Fails with
    /// an `io::Error` if the system has no huge pages configured.
    #[cfg(target_os = "linux")]
    HugeTlb,
}

enum Kind {
    Heap { layout: Layout },
    Mmap(#[allow(dead_code)] MmapMut),
}

/// An owned, zero-initialized, non-moving byte region.
pub struct Region {
    ptr: NonNull<u8>,
    kind: Kind,
}

// The region is raw storage; all typed access goes through the map's
// own synchronization.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocates a zeroed region for `layout` from the chosen provider.
    ///
    /// Heap allocation failure aborts via `handle_alloc_error`, like
    /// the standard collections; mmap failure surfaces as `io::Error`.
    pub fn zeroed(layout: Layout, storage: Storage) -> io::Result<Region> {
        match storage {
            Storage::Heap => Ok(Self::heap(layout)),
            Storage::Mmap => Self::mmap(layout, false),
            #[cfg(target_os = "linux")]
            Storage::HugeTlb => Self::mmap(layout, true),
        }
    }

    fn heap(layout: Layout) -> Region {
        if layout.size() == 0 {
            return Region {
                ptr: NonNull::dangling(),
                kind: Kind::Heap { layout },
            };
        }
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Region {
            ptr,
            kind: Kind::Heap { layout },
        }
    }

    fn mmap(layout: Layout, huge: bool) -> io::Result<Region> {
        // Anonymous maps are page-aligned; that covers every layout the
        // map asks for, but reject anything stricter than a page.
        assert!(
            layout.align() <= 4096,
            "mmap backing cannot satisfy alignment {}",
            layout.align()
        );
        let mut opts = MmapOptions::new();
        opts.len(layout.size().max(1));
        #[cfg(target_os = "linux")]
        if huge {
            opts.huge(None);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = huge;
        let mut map: MmapMut = opts.map_anon()?;
        // Anonymous pages are already zero-filled by the kernel.
        let ptr = NonNull::new(map.as_mut_ptr()).expect("mmap returned null");
        Ok(Region {
            ptr,
            kind: Kind::Mmap(map),
        })
    }

    /// Base pointer of the region. Stable for the region's lifetime.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Kind::Heap { layout } = self.kind {
            if layout.size() != 0 {
                unsafe { dealloc(self.ptr.as_ptr(), layout) };
            }
        }
        // Mmap regions unmap when MmapMut drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_zeroed(r: &Region, len: usize) {
        let bytes = unsafe { core::slice::from_raw_parts(r.as_ptr(), len) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn heap_region_is_zeroed_and_stable() {
        let layout = Layout::array::<u64>(1024).unwrap();
        let r = Region::zeroed(layout, Storage::Heap).unwrap();
        let p = r.as_ptr();
        assert_zeroed(&r, layout.size());
        unsafe { *p = 0xAB };
        assert_eq!(r.as_ptr(), p);
    }

    #[test]
    fn mmap_region_is_zeroed() {
        let layout = Layout::array::<u64>(4096).unwrap();
        let r = Region::zeroed(layout, Storage::Mmap).unwrap();
        assert_zeroed(&r, layout.size());
    }

    #[test]
    fn zero_sized_heap_region_is_fine() {
        let layout = Layout::array::<u8>(0).unwrap();
        let _r = Region::zeroed(layout, Storage::Heap).unwrap();
    }
}
