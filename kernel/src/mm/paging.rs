//! Two-level page tables.
//!
//! One root directory of 1024 entries, each pointing at a leaf table of
//! 1024 page entries. The identity range is mapped at boot from a static
//! pool of leaf tables (the heap is not up yet); tables installed later by
//! [`map_page`] come off the kernel heap, whose arena is inside the
//! identity range and therefore reachable by its own address.

use bitflags::bitflags;

bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

/// Base of the lazily-faulted dynamic region.
pub const DYNAMIC_BASE: u32 = 0xc000_0000;

/// Virtual/physical page size.
pub const PAGE_SIZE: u32 = 4096;

const ENTRY_ADDR_MASK: u32 = 0xffff_f000;

/// A page directory or page table: 1024 32-bit entries, page-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u32; 1024],
}

impl PageTable {
    pub const fn zeroed() -> Self {
        Self { entries: [0; 1024] }
    }

    #[inline]
    pub fn entry(&self, index: usize) -> u32 {
        self.entries[index]
    }

    #[inline]
    pub fn set_entry(&mut self, index: usize, entry: u32) {
        self.entries[index] = entry;
    }
}

/// Build an entry from a frame address and flags.
#[inline]
pub fn make_entry(addr: u32, flags: PageFlags) -> u32 {
    (addr & ENTRY_ADDR_MASK) | flags.bits()
}

/// Frame address stored in an entry.
#[inline]
pub fn entry_addr(entry: u32) -> u32 {
    entry & ENTRY_ADDR_MASK
}

/// True if the entry maps something.
#[inline]
pub fn entry_present(entry: u32) -> bool {
    entry & PageFlags::PRESENT.bits() != 0
}

/// Directory slot for a virtual address.
#[inline]
pub fn dir_index(virt: u32) -> usize {
    (virt >> 22) as usize
}

/// Leaf-table slot for a virtual address.
#[inline]
pub fn table_index(virt: u32) -> usize {
    ((virt >> 12) & 0x3ff) as usize
}

/// Round up to the 4 MiB a full leaf table spans.
pub const fn align_up_4m(value: u32) -> u32 {
    (value + 0x3f_ffff) & !0x3f_ffff
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod active {
    use core::arch::asm;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use spin::Mutex;

    use super::*;

    static mut PAGE_DIRECTORY: PageTable = PageTable::zeroed();

    /// Leaf tables for the boot-time identity mapping; 32 tables cover up
    /// to 128 MiB of identity-mapped space.
    const IDENTITY_POOL_LEN: usize = 32;
    static mut IDENTITY_POOL: [PageTable; IDENTITY_POOL_LEN] =
        [const { PageTable::zeroed() }; IDENTITY_POOL_LEN];
    static POOL_NEXT: AtomicUsize = AtomicUsize::new(0);

    /// Serializes all mutation of the directory after boot.
    static MAP_LOCK: Mutex<()> = Mutex::new(());

    fn take_pool_table() -> &'static mut PageTable {
        let idx = POOL_NEXT.fetch_add(1, Ordering::Relaxed);
        assert!(idx < IDENTITY_POOL_LEN, "identity range exceeds table pool");
        // SAFETY: each pool slot is handed out exactly once (the atomic
        // index never repeats), so no aliasing references exist.
        unsafe { &mut (*core::ptr::addr_of_mut!(IDENTITY_POOL))[idx] }
    }

    /// Identity-map `[0, identity_end)` and switch paging on.
    ///
    /// # Safety
    ///
    /// Must run once, on the boot CPU, before any address outside the
    /// identity range is touched. `identity_end` must cover the kernel
    /// image, boot stack, heap arena and frame bitmap.
    pub unsafe fn init(identity_end: u32) {
        let identity_end = align_up_4m(identity_end);
        // SAFETY: single-threaded boot; nothing else references the
        // directory yet.
        let dir = unsafe { &mut *core::ptr::addr_of_mut!(PAGE_DIRECTORY) };

        let mut virt: u32 = 0;
        while virt < identity_end {
            let table = take_pool_table();
            for i in 0..1024 {
                table.set_entry(
                    i,
                    make_entry(
                        virt + (i as u32) * PAGE_SIZE,
                        PageFlags::PRESENT | PageFlags::WRITABLE,
                    ),
                );
            }
            let table_phys = table as *const PageTable as u32;
            dir.set_entry(
                dir_index(virt),
                make_entry(table_phys, PageFlags::PRESENT | PageFlags::WRITABLE),
            );
            virt += 4 * 1024 * 1024;
        }

        let dir_phys = core::ptr::addr_of!(PAGE_DIRECTORY) as u32;
        // SAFETY: the directory now identity-maps everything the kernel is
        // currently executing from, so enabling paging does not pull the
        // rug out. CR0.PG turns translation on.
        unsafe {
            asm!(
                "mov cr3, {dir}",
                "mov eax, cr0",
                "or eax, 0x80000000",
                "mov cr0, eax",
                dir = in(reg) dir_phys,
                out("eax") _,
            );
        }
        log::info!("paging: identity-mapped [0, {:#010x})", identity_end);
    }

    /// Install (or overwrite) a single 4 KiB mapping, allocating a leaf
    /// table from the heap if the directory slot is empty.
    pub fn map_page(virt: u32, phys: u32, flags: PageFlags) {
        use alloc::boxed::Box;

        let _guard = MAP_LOCK.lock();
        // SAFETY: all directory mutation happens under MAP_LOCK with one
        // CPU, so the reference is exclusive in practice.
        let dir = unsafe { &mut *core::ptr::addr_of_mut!(PAGE_DIRECTORY) };

        let di = dir_index(virt);
        let table: &mut PageTable = if entry_present(dir.entry(di)) {
            // SAFETY: present directory entries always hold the address of
            // a live PageTable (pool or leaked box), identity-reachable.
            unsafe { &mut *(entry_addr(dir.entry(di)) as *mut PageTable) }
        } else {
            let table = Box::leak(Box::new(PageTable::zeroed()));
            let table_phys = table as *const PageTable as u32;
            dir.set_entry(di, make_entry(table_phys, PageFlags::PRESENT | PageFlags::WRITABLE));
            table
        };

        table.set_entry(table_index(virt), make_entry(phys, flags));
        // SAFETY: invlpg only drops the TLB entry for this page.
        unsafe {
            asm!("invlpg [{}]", in(reg) virt, options(nostack, preserves_flags));
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use active::{init, map_page};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn entry_encoding() {
        let e = make_entry(0x0012_3456, PageFlags::PRESENT | PageFlags::WRITABLE);
        assert_eq!(entry_addr(e), 0x0012_3000);
        assert!(entry_present(e));
        assert_eq!(e & 0x7, 0x3);

        assert!(!entry_present(make_entry(0x0012_3000, PageFlags::WRITABLE)));
    }

    #[test]
    fn index_split() {
        // 0xC0001000 = directory 0x300, table 1
        assert_eq!(dir_index(0xc000_1000), 0x300);
        assert_eq!(table_index(0xc000_1000), 1);
        // last page of the address space
        assert_eq!(dir_index(0xffff_f000), 1023);
        assert_eq!(table_index(0xffff_f000), 1023);
    }

    #[test]
    fn four_meg_rounding() {
        assert_eq!(align_up_4m(0), 0);
        assert_eq!(align_up_4m(1), 4 * 1024 * 1024);
        assert_eq!(align_up_4m(4 * 1024 * 1024), 4 * 1024 * 1024);
        assert_eq!(align_up_4m(4 * 1024 * 1024 + 1), 8 * 1024 * 1024);
    }

    #[test]
    fn table_mapping_round_trip() {
        let mut table = PageTable::zeroed();
        let virt: u32 = 0xc000_1000;
        table.set_entry(
            table_index(virt),
            make_entry(0x0020_0000, PageFlags::PRESENT | PageFlags::WRITABLE),
        );
        let e = table.entry(table_index(virt));
        assert_eq!(entry_addr(e), 0x0020_0000);
        assert!(entry_present(e));
        assert_eq!(table.entry(0), 0);
    }
}
