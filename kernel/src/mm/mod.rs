//! Memory management: physical frames, paging, kernel heap.
//!
//! Boot order matters and is fixed: frames first (the bitmap needs raw
//! physical memory), then paging (identity map covers everything placed so
//! far), then the heap (whose arena the identity map just covered).

pub mod frame;
pub mod heap;
pub mod page_fault;
pub mod paging;

pub use frame::{FrameStats, PHYS_PAGE, PHYS_START};
pub use heap::HeapStats;
pub use paging::{PageFlags, DYNAMIC_BASE, PAGE_SIZE};

/// Bare-metal memory bring-up.
///
/// # Safety
///
/// Single-threaded boot only; `total_bytes` must come from the loader's
/// memory map and the linker-provided kernel image bounds must be
/// truthful.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub unsafe fn init(total_bytes: u64) {
    extern "C" {
        static __kernel_start: u8;
        static __kernel_end: u8;
    }

    // SAFETY: the linker script defines both symbols at the image bounds;
    // only their addresses are taken.
    let (kernel_start, kernel_end) = unsafe {
        (
            core::ptr::addr_of!(__kernel_start) as u32,
            core::ptr::addr_of!(__kernel_end) as u32,
        )
    };

    // SAFETY: forwarded boot contract; the bitmap lands right after the
    // image, which the linker script leaves free.
    unsafe {
        frame::FRAME_ALLOCATOR
            .lock()
            .init(total_bytes, kernel_start, kernel_end);
    }

    // Identity-map the image, the frame bitmap behind it, and a 1 MiB
    // growth buffer, rounded up to the 4 MiB a leaf table spans.
    let identity_end = paging::align_up_4m(kernel_end + 1024 * 1024);
    // SAFETY: identity_end covers everything currently addressed; paging
    // flips on with the instruction stream identity-mapped.
    unsafe {
        paging::init(identity_end);
    }

    // SAFETY: the arena is static, unused until here, and covered by the
    // identity map.
    unsafe {
        let arena = core::ptr::addr_of_mut!(HEAP_ARENA) as *mut u8;
        crate::heap_allocator().init(arena, heap::HEAP_SIZE);
    }
    log::info!(
        "heap: {} KiB arena ready",
        heap::HEAP_SIZE / 1024
    );
}

/// Backing storage for the kernel heap; lives in `.bss`, i.e. directly
/// after the kernel image.
#[cfg(all(target_arch = "x86", target_os = "none"))]
static mut HEAP_ARENA: [u8; heap::HEAP_SIZE] = [0; heap::HEAP_SIZE];

/// Heap statistics (zeros on the host, where the system allocator runs).
pub fn heap_stats() -> HeapStats {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        crate::heap_allocator().stats()
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        HeapStats::default()
    }
}
