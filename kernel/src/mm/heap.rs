//! Kernel heap: a first-fit free list with splitting and coalescing.
//!
//! The arena is a static byte array in `.bss`, so it sits directly after
//! the kernel image and inside the identity-mapped range; that keeps the
//! allocator usable from the page-fault path, which may need a leaf table
//! while interrupts are off. The allocator never blocks and never calls
//! itself.
//!
//! Every block, free or used, carries a header `{size, free, next}`; the
//! list is ordered by address and tiles the arena, so coalescing is a
//! single forward sweep merging free neighbours.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;

use spin::Mutex;

/// Arena size for the kernel heap.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Minimum alignment and size granularity of payloads.
pub const HEAP_ALIGN: usize = 8;

/// Heap statistics for `meminfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStats {
    /// Arena bytes under management.
    pub total: usize,
    /// Payload bytes currently allocated.
    pub used: usize,
    /// Payload bytes currently free.
    pub free: usize,
}

#[repr(C)]
struct BlockHeader {
    /// Payload bytes following this header.
    size: usize,
    free: bool,
    next: *mut BlockHeader,
}

/// Header stride, padded so payloads keep [`HEAP_ALIGN`].
const fn header_size() -> usize {
    (size_of::<BlockHeader>() + HEAP_ALIGN - 1) & !(HEAP_ALIGN - 1)
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub struct FreeList {
    first: *mut BlockHeader,
    total: usize,
    used: usize,
}

// SAFETY: the raw block pointers all point into the arena the list was
// initialized over; access is serialized by the Mutex wrapping every list.
unsafe impl Send for FreeList {}

impl FreeList {
    pub const fn empty() -> Self {
        Self {
            first: ptr::null_mut(),
            total: 0,
            used: 0,
        }
    }

    /// Adopt `size` bytes at `start` as the arena.
    ///
    /// # Safety
    ///
    /// The region must be unused, writable, and live for as long as the
    /// allocator; `init` must be called exactly once per list.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) {
        let aligned = align_up(start as usize, HEAP_ALIGN);
        let size = size - (aligned - start as usize);
        assert!(size > header_size() + HEAP_ALIGN, "arena too small");

        let first = aligned as *mut BlockHeader;
        // SAFETY: `first` is in-bounds, aligned, and exclusively ours per
        // the function contract.
        unsafe {
            (*first).size = (size - header_size()) & !(HEAP_ALIGN - 1);
            (*first).free = true;
            (*first).next = ptr::null_mut();
        }
        self.first = first;
        // SAFETY: just written above.
        self.total = unsafe { (*first).size };
        self.used = 0;
    }

    /// First-fit allocation honoring `layout`'s alignment. Returns null on
    /// exhaustion.
    pub fn allocate(&mut self, layout: Layout) -> *mut u8 {
        let size = align_up(layout.size().max(1), HEAP_ALIGN);
        let align = layout.align().max(HEAP_ALIGN);

        let mut cur = self.first;
        while !cur.is_null() {
            // SAFETY: `cur` came from the list, whose nodes are always
            // valid headers inside the arena.
            let block = unsafe { &mut *cur };
            if !block.free {
                cur = block.next;
                continue;
            }

            let payload = cur as usize + header_size();
            let mut aligned = align_up(payload, align);
            // A front remainder must be big enough to stand alone as a
            // free block.
            while aligned != payload && aligned - payload < header_size() + HEAP_ALIGN {
                aligned += align;
            }
            let gap = aligned - payload;

            if block.size < gap + size {
                cur = block.next;
                continue;
            }

            let chosen = if gap == 0 {
                cur
            } else {
                // Split the front of the block off as a smaller free block
                // and allocate from the aligned remainder.
                let split = (aligned - header_size()) as *mut BlockHeader;
                // SAFETY: `split` lies inside `block`'s payload (gap fits
                // a header plus minimum payload), is HEAP_ALIGN-aligned,
                // and no other header overlaps it.
                unsafe {
                    (*split).size = block.size - gap;
                    (*split).free = true;
                    (*split).next = block.next;
                }
                block.size = gap - header_size();
                block.next = split;
                split
            };

            // SAFETY: `chosen` is a valid header (either `cur` or the
            // split block written above).
            let chosen_block = unsafe { &mut *chosen };
            if chosen_block.size >= size + header_size() + HEAP_ALIGN {
                let rest = (chosen as usize + header_size() + size) as *mut BlockHeader;
                // SAFETY: the size check guarantees room for a header and
                // minimum payload after the allocation; alignment follows
                // from size/header granularity.
                unsafe {
                    (*rest).size = chosen_block.size - size - header_size();
                    (*rest).free = true;
                    (*rest).next = chosen_block.next;
                }
                chosen_block.size = size;
                chosen_block.next = rest;
            }

            chosen_block.free = false;
            self.used += chosen_block.size;
            return (chosen as usize + header_size()) as *mut u8;
        }

        log::warn!("heap: out of memory allocating {} bytes", layout.size());
        ptr::null_mut()
    }

    /// Return a block and coalesce.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`FreeList::allocate`] on this list and
    /// not have been freed since.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let header = (ptr as usize - header_size()) as *mut BlockHeader;
        // SAFETY: per the contract, `header` is the live header preceding
        // an allocation we handed out.
        unsafe {
            (*header).free = true;
            self.used -= (*header).size;
        }
        self.coalesce();
    }

    /// One sweep merging every run of adjacent free blocks.
    fn coalesce(&mut self) {
        let mut cur = self.first;
        while !cur.is_null() {
            // SAFETY: list nodes are valid headers; see Send impl note.
            let block = unsafe { &mut *cur };
            let next = block.next;
            if next.is_null() {
                break;
            }
            // SAFETY: non-null next pointers are valid headers.
            let next_block = unsafe { &mut *next };
            let adjacent = cur as usize + header_size() + block.size == next as usize;
            if block.free && next_block.free && adjacent {
                block.size += header_size() + next_block.size;
                block.next = next_block.next;
                // stay on `cur`: the new neighbour may be free too
            } else {
                cur = next;
            }
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total: self.total,
            used: self.used,
            free: self.total.saturating_sub(self.used),
        }
    }

    /// Number of adjacent free block pairs; zero whenever the coalescing
    /// invariant holds.
    #[cfg(all(test, not(target_os = "none")))]
    fn adjacent_free_pairs(&self) -> usize {
        let mut count = 0;
        let mut cur = self.first;
        while !cur.is_null() {
            // SAFETY: list nodes are valid headers.
            let block = unsafe { &*cur };
            if !block.next.is_null() {
                // SAFETY: non-null next is a valid header.
                let next = unsafe { &*block.next };
                if block.free && next.free {
                    count += 1;
                }
            }
            cur = block.next;
        }
        count
    }
}

/// The free list behind a lock, usable as `#[global_allocator]`.
pub struct LockedHeap {
    inner: Mutex<FreeList>,
}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(FreeList::empty()),
        }
    }

    /// Initialize the arena.
    ///
    /// # Safety
    ///
    /// Same contract as [`FreeList::init`].
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: forwarded.
        unsafe {
            self.inner.lock().init(start, size);
        }
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }
}

// SAFETY: allocate/deallocate uphold the GlobalAlloc contract; the lock
// serializes list access and the allocator never re-enters itself.
unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner.lock().allocate(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: GlobalAlloc guarantees `ptr` came from `alloc` above.
        unsafe {
            self.inner.lock().deallocate(ptr);
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn arena(bytes: usize) -> FreeList {
        let storage = alloc::vec![0u8; bytes].leak();
        let mut list = FreeList::empty();
        // SAFETY: leaked storage is exclusively owned by the new list.
        unsafe {
            list.init(storage.as_mut_ptr(), bytes);
        }
        list
    }

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 8).expect("layout")
    }

    #[test]
    fn alloc_free_reuses_memory() {
        let mut heap = arena(4096);
        let a = heap.allocate(layout(100));
        assert!(!a.is_null());
        // SAFETY: `a` was just allocated from this list.
        unsafe {
            heap.deallocate(a);
        }
        let b = heap.allocate(layout(100));
        assert_eq!(a, b);
    }

    #[test]
    fn split_leaves_usable_remainder() {
        let mut heap = arena(4096);
        let a = heap.allocate(layout(64));
        let b = heap.allocate(layout(64));
        assert!(!a.is_null() && !b.is_null());
        assert!(b as usize > a as usize);
        let used = heap.stats().used;
        assert_eq!(used, 128);
    }

    #[test]
    fn coalescing_invariant_holds_after_mixed_traffic() {
        let mut heap = arena(8192);
        let mut live = alloc::vec::Vec::new();
        for i in 0..16 {
            live.push(heap.allocate(layout(32 + i * 8)));
        }
        // free every other block, then the rest, checking the invariant
        // as we go
        for idx in (0..16).step_by(2) {
            // SAFETY: pointers come from allocate and are freed once.
            unsafe { heap.deallocate(live[idx]) };
            assert_eq!(heap.adjacent_free_pairs(), 0);
        }
        for idx in (1..16).step_by(2) {
            // SAFETY: as above.
            unsafe { heap.deallocate(live[idx]) };
            assert_eq!(heap.adjacent_free_pairs(), 0);
        }
        // everything merged back into one block
        let stats = heap.stats();
        assert_eq!(stats.used, 0);
        let big = heap.allocate(layout(stats.total));
        assert!(!big.is_null());
    }

    #[test]
    fn exhaustion_returns_null() {
        let mut heap = arena(1024);
        assert!(heap.allocate(layout(4096)).is_null());
        let a = heap.allocate(layout(512));
        assert!(!a.is_null());
        assert!(heap.allocate(layout(512)).is_null());
    }

    #[test]
    fn large_alignment_is_honored() {
        let mut heap = arena(64 * 1024);
        let layout = Layout::from_size_align(4096, 4096).expect("layout");
        let p = heap.allocate(layout);
        assert!(!p.is_null());
        assert_eq!(p as usize % 4096, 0);
        // SAFETY: just allocated above.
        unsafe { heap.deallocate(p) };
        assert_eq!(heap.adjacent_free_pairs(), 0);
    }

    #[test]
    fn stats_track_usage() {
        let mut heap = arena(4096);
        let total = heap.stats().total;
        let a = heap.allocate(layout(256));
        assert_eq!(heap.stats().used, 256);
        // SAFETY: just allocated above.
        unsafe { heap.deallocate(a) };
        let stats = heap.stats();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.total, total);
        assert_eq!(stats.free, total);
    }
}
