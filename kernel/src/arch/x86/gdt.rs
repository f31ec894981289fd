//! Flat-model GDT.
//!
//! Three descriptors: null, ring-0 code at selector 0x08, ring-0 data at
//! 0x10, all spanning the full 4 GiB address space. There is no user mode,
//! so nothing else is needed.

use core::arch::asm;

/// Kernel code segment selector.
pub const KERNEL_CODE: u16 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DATA: u16 = 0x10;

// base 0, limit 0xfffff, 4 KiB granularity, 32-bit.
static GDT: [u64; 3] = [
    0,
    0x00cf_9a00_0000_ffff, // code: present, ring 0, executable, readable
    0x00cf_9200_0000_ffff, // data: present, ring 0, writable
];

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

/// Load the GDT and reload every segment register.
pub fn init() {
    let pointer = DescriptorPointer {
        limit: (core::mem::size_of_val(&GDT) - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY: the descriptor table is 'static and the selectors written
    // below index valid entries in it. The far return reloads CS with the
    // new code selector.
    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "mov eax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push 0x08",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) core::ptr::addr_of!(pointer),
            out("eax") _,
        );
    }
}
