//! Physical frame allocator.
//!
//! One bit per 4 KiB page over `[PHYS_START, PHYS_END)`, set = used. The
//! bitmap itself lives in physical memory just past the kernel image and
//! is marked used along with the image. First-fit is fine here: at page
//! granularity there is no fragmentation to speak of.

use spin::Mutex;

/// Size of a physical page frame.
pub const PHYS_PAGE: u32 = 4096;

/// First managed physical address (everything below 1 MiB is legacy).
pub const PHYS_START: u32 = 0x0010_0000;

/// Upper bound on managed physical memory.
pub const MAX_PHYS: u64 = 256 * 1024 * 1024;

/// Allocator statistics for `meminfo`.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub total_pages: usize,
    pub free_pages: usize,
}

pub struct FrameAllocator {
    bitmap: Option<&'static mut [u8]>,
    phys_start: u32,
    phys_end: u32,
    free_pages: usize,
}

impl FrameAllocator {
    pub const fn empty() -> Self {
        Self {
            bitmap: None,
            phys_start: 0,
            phys_end: 0,
            free_pages: 0,
        }
    }

    /// Initialize over `[PHYS_START, PHYS_START + min(total_bytes,
    /// MAX_PHYS))`, carving the bitmap out of physical memory directly
    /// after the kernel image and marking both the image and the bitmap
    /// used.
    ///
    /// # Safety
    ///
    /// `kernel_end` must be the true end of the kernel image; the pages
    /// following it up to the bitmap's end must be unused RAM, and paging
    /// must not yet remap them away from identity.
    pub unsafe fn init(&mut self, total_bytes: u64, kernel_start: u32, kernel_end: u32) {
        let span = total_bytes.min(MAX_PHYS) as u32;
        let phys_end = PHYS_START.saturating_add(span) & !(PHYS_PAGE - 1);
        let pages = ((phys_end - PHYS_START) / PHYS_PAGE) as usize;
        let bitmap_len = pages.div_ceil(8);

        let bitmap_base = align_up(kernel_end, PHYS_PAGE);
        // SAFETY: per the function contract the span past the kernel image
        // is unused identity-mapped RAM, and this is the only reference
        // ever created to it.
        let bitmap =
            unsafe { core::slice::from_raw_parts_mut(bitmap_base as *mut u8, bitmap_len) };
        bitmap.fill(0);

        self.bitmap = Some(bitmap);
        self.phys_start = PHYS_START;
        self.phys_end = phys_end;
        self.free_pages = pages;

        let bitmap_end = bitmap_base + bitmap_len as u32;
        self.reserve_region(kernel_start, kernel_end);
        self.reserve_region(bitmap_base, bitmap_end);
        log::info!(
            "frames: {} pages in [{:#010x}, {:#010x}), bitmap at {:#010x}",
            pages,
            PHYS_START,
            phys_end,
            bitmap_base,
        );
    }

    /// Initialize with caller-provided bitmap storage. This is the
    /// testable core of [`FrameAllocator::init`].
    pub fn init_with(&mut self, storage: &'static mut [u8], phys_start: u32, phys_end: u32) {
        let pages = ((phys_end - phys_start) / PHYS_PAGE) as usize;
        assert!(storage.len() >= pages.div_ceil(8));
        storage.fill(0);
        self.bitmap = Some(storage);
        self.phys_start = phys_start;
        self.phys_end = phys_end;
        self.free_pages = pages;
    }

    fn page_count(&self) -> usize {
        ((self.phys_end - self.phys_start) / PHYS_PAGE) as usize
    }

    /// Mark every page overlapping `[start, end)` as used.
    pub fn reserve_region(&mut self, start: u32, end: u32) {
        let start = start.max(self.phys_start) & !(PHYS_PAGE - 1);
        let end = align_up(end.min(self.phys_end), PHYS_PAGE);
        let mut addr = start;
        while addr < end {
            let idx = ((addr - self.phys_start) / PHYS_PAGE) as usize;
            if let Some(ref mut bitmap) = self.bitmap {
                if bitmap[idx / 8] & (1 << (idx % 8)) == 0 {
                    bitmap[idx / 8] |= 1 << (idx % 8);
                    self.free_pages -= 1;
                }
            }
            addr += PHYS_PAGE;
        }
    }

    /// Hand out the first free frame, or `None` when physical memory is
    /// exhausted.
    pub fn alloc_page(&mut self) -> Option<u32> {
        let pages = self.page_count();
        let bitmap = self.bitmap.as_mut()?;
        for (byte_idx, byte) in bitmap.iter_mut().enumerate() {
            if *byte == 0xff {
                continue;
            }
            for bit in 0..8 {
                let idx = byte_idx * 8 + bit;
                if idx >= pages {
                    return None;
                }
                if *byte & (1 << bit) == 0 {
                    *byte |= 1 << bit;
                    self.free_pages -= 1;
                    return Some(self.phys_start + idx as u32 * PHYS_PAGE);
                }
            }
        }
        None
    }

    /// Return a frame. Out-of-range and double frees are logged and
    /// otherwise ignored.
    pub fn free_page(&mut self, addr: u32) {
        if addr < self.phys_start || addr >= self.phys_end || addr % PHYS_PAGE != 0 {
            log::warn!("free_page: address {:#010x} out of range", addr);
            return;
        }
        let idx = ((addr - self.phys_start) / PHYS_PAGE) as usize;
        let Some(ref mut bitmap) = self.bitmap else {
            return;
        };
        if bitmap[idx / 8] & (1 << (idx % 8)) == 0 {
            log::warn!("free_page: double free of {:#010x}", addr);
            return;
        }
        bitmap[idx / 8] &= !(1 << (idx % 8));
        self.free_pages += 1;
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            total_pages: self.page_count(),
            free_pages: self.free_pages,
        }
    }

    /// Count clear bits by walking the bitmap; equals
    /// `stats().free_pages` at all times.
    pub fn count_free_bits(&self) -> usize {
        let pages = self.page_count();
        let Some(ref bitmap) = self.bitmap else {
            return 0;
        };
        (0..pages)
            .filter(|idx| bitmap[idx / 8] & (1 << (idx % 8)) == 0)
            .count()
    }
}

const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Global frame allocator instance.
pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::empty());

/// Allocate one frame from the global allocator.
pub fn alloc_page() -> Option<u32> {
    crate::arch::without_interrupts(|| FRAME_ALLOCATOR.lock().alloc_page())
}

/// Free one frame through the global allocator.
pub fn free_page(addr: u32) {
    crate::arch::without_interrupts(|| FRAME_ALLOCATOR.lock().free_page(addr));
}

/// Statistics of the global allocator.
pub fn stats() -> FrameStats {
    FRAME_ALLOCATOR.lock().stats()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn storage(pages: usize) -> &'static mut [u8] {
        alloc::vec![0u8; pages.div_ceil(8)].leak()
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let mut fa = FrameAllocator::empty();
        fa.init_with(storage(16), 0x0010_0000, 0x0010_0000 + 16 * PHYS_PAGE);

        let a = fa.alloc_page().expect("fresh allocator must hand out a frame");
        let b = fa.alloc_page().expect("second frame");
        assert_eq!(a, 0x0010_0000);
        assert_eq!(b, 0x0010_0000 + PHYS_PAGE);
        assert_eq!(fa.stats().free_pages, 14);

        fa.free_page(a);
        assert_eq!(fa.stats().free_pages, 15);
        // first-fit hands the freed frame back out
        assert_eq!(fa.alloc_page(), Some(a));
    }

    #[test]
    fn free_count_matches_bitmap() {
        let mut fa = FrameAllocator::empty();
        fa.init_with(storage(64), 0x0010_0000, 0x0010_0000 + 64 * PHYS_PAGE);

        let mut held = alloc::vec::Vec::new();
        for _ in 0..20 {
            held.push(fa.alloc_page().expect("frame"));
        }
        for addr in held.iter().step_by(2) {
            fa.free_page(*addr);
        }
        assert_eq!(fa.stats().free_pages, fa.count_free_bits());
    }

    #[test]
    fn double_free_and_out_of_range_are_ignored() {
        let mut fa = FrameAllocator::empty();
        fa.init_with(storage(8), 0x0010_0000, 0x0010_0000 + 8 * PHYS_PAGE);

        let a = fa.alloc_page().expect("frame");
        fa.free_page(a);
        let free_before = fa.stats().free_pages;
        fa.free_page(a); // double free
        fa.free_page(0); // below range
        fa.free_page(0x0010_0000 + 1); // misaligned
        assert_eq!(fa.stats().free_pages, free_before);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut fa = FrameAllocator::empty();
        fa.init_with(storage(4), 0x0010_0000, 0x0010_0000 + 4 * PHYS_PAGE);
        for _ in 0..4 {
            assert!(fa.alloc_page().is_some());
        }
        assert_eq!(fa.alloc_page(), None);
        assert_eq!(fa.stats().free_pages, 0);
    }

    #[test]
    fn reserve_region_marks_pages_used() {
        let mut fa = FrameAllocator::empty();
        fa.init_with(storage(16), 0x0010_0000, 0x0010_0000 + 16 * PHYS_PAGE);
        // partial pages round outward
        fa.reserve_region(0x0010_0800, 0x0010_2800);
        assert_eq!(fa.stats().free_pages, 13);
        assert_eq!(fa.alloc_page(), Some(0x0010_3000));
    }
}
