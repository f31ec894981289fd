//! 32-bit x86 bring-up: descriptor tables, interrupt controller, PIT,
//! console devices and the context-switch primitive.

pub mod boot;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod port;
pub mod serial;
pub mod vga;

use core::arch::asm;

/// Bring up the protected-mode infrastructure. Interrupts stay disabled
/// until the caller is ready to take them.
pub fn init() {
    gdt::init();
    idt::init();
    pic::init();
    pit::init();
    serial::init();
}

/// True if the CPU currently accepts maskable interrupts.
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    // SAFETY: pushfd/pop only reads the flags register onto our own stack.
    unsafe {
        asm!("pushfd", "pop {}", out(reg) eflags, options(preserves_flags));
    }
    eflags & 0x200 != 0
}

/// Enable maskable interrupts.
pub fn enable_interrupts() {
    // SAFETY: sti only sets the interrupt flag; handlers are installed by
    // the time anyone calls this.
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Disable maskable interrupts.
pub fn disable_interrupts() {
    // SAFETY: cli only clears the interrupt flag.
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Run `f` with interrupts disabled, restoring the previous interrupt
/// flag afterwards. This is the kernel's one concurrency boundary: every
/// mutation an IRQ path could also reach goes through here.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = interrupts_enabled();
    if was_enabled {
        disable_interrupts();
    }
    let result = f();
    if was_enabled {
        enable_interrupts();
    }
    result
}

/// Wait for the next interrupt.
pub fn idle_wait() {
    // SAFETY: hlt resumes on the next interrupt; harmless in the idle loop.
    unsafe {
        asm!("hlt", options(nomem, nostack));
    }
}

/// Stop the CPU for good. Used for unrecoverable faults.
pub fn halt() -> ! {
    loop {
        // SAFETY: interrupts are off, so hlt never wakes; this parks the CPU.
        unsafe {
            asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}
