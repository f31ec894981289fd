//! Interrupt descriptor table.
//!
//! CPU exceptions are fatal except for the page fault, which is forwarded
//! to the memory subsystem (`mm::page_fault`). IRQ 0 drives the tick; IRQ 1
//! feeds the keyboard driver. IRQ handlers never context-switch.

use core::arch::asm;
use core::mem::size_of;

use super::pic;
use crate::mm::page_fault::{self, FaultCode};

/// Stack frame pushed by the CPU on interrupt entry.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32) -> Self {
        Self {
            offset_low: (handler & 0xffff) as u16,
            selector: super::gdt::KERNEL_CODE,
            zero: 0,
            // present, ring 0, 32-bit interrupt gate
            type_attr: 0x8e,
            offset_high: (handler >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];

/// Fill the table and load it.
pub fn init() {
    // SAFETY: boot-time single-threaded initialization of the static table,
    // followed by lidt on its stable address.
    unsafe {
        let idt = &mut *core::ptr::addr_of_mut!(IDT);
        idt[0] = IdtEntry::new(divide_error as usize as u32);
        idt[3] = IdtEntry::new(breakpoint as usize as u32);
        idt[6] = IdtEntry::new(invalid_opcode as usize as u32);
        idt[8] = IdtEntry::new(double_fault as usize as u32);
        idt[13] = IdtEntry::new(general_protection as usize as u32);
        idt[14] = IdtEntry::new(page_fault_entry as usize as u32);
        idt[usize::from(pic::IRQ_BASE)] = IdtEntry::new(timer_interrupt as usize as u32);
        idt[usize::from(pic::IRQ_BASE) + 1] = IdtEntry::new(keyboard_interrupt as usize as u32);

        let pointer = IdtPointer {
            limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        asm!("lidt [{}]", in(reg) core::ptr::addr_of!(pointer));
    }
}

extern "x86-interrupt" fn divide_error(frame: InterruptStackFrame) {
    log::error!("divide error at {:#010x}", frame.eip);
    crate::arch::halt();
}

extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
    log::warn!("breakpoint at {:#010x}", frame.eip);
}

extern "x86-interrupt" fn invalid_opcode(frame: InterruptStackFrame) {
    log::error!("invalid opcode at {:#010x}", frame.eip);
    crate::arch::halt();
}

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, _error_code: u32) {
    log::error!("double fault at {:#010x}", frame.eip);
    crate::arch::halt();
}

extern "x86-interrupt" fn general_protection(frame: InterruptStackFrame, error_code: u32) {
    log::error!(
        "general protection fault at {:#010x} (error {:#x})",
        frame.eip,
        error_code
    );
    crate::arch::halt();
}

extern "x86-interrupt" fn page_fault_entry(_frame: InterruptStackFrame, error_code: u32) {
    let fault_addr: u32;
    // SAFETY: CR2 holds the faulting linear address; reading it has no side
    // effects.
    unsafe {
        asm!("mov {}, cr2", out(reg) fault_addr, options(nomem, nostack));
    }
    page_fault::handle(fault_addr, FaultCode::from_bits_truncate(error_code));
}

extern "x86-interrupt" fn timer_interrupt(_frame: InterruptStackFrame) {
    crate::timer::tick();
    pic::end_of_interrupt(0);
}

extern "x86-interrupt" fn keyboard_interrupt(_frame: InterruptStackFrame) {
    // SAFETY: reading port 0x60 pops the controller's output buffer, which
    // is exactly what the handler is for.
    let scancode = unsafe { super::port::inb(0x60) };
    crate::drivers::keyboard::handle_scancode(scancode);
    pic::end_of_interrupt(1);
}
