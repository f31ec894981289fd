//! Cooperative context switch.
//!
//! The contract with the spawner: a task's context is nothing but its
//! saved stack pointer. The callee-saved registers live on the task's own
//! stack, pushed here and popped on the way back in. A freshly spawned
//! task's stack therefore holds, from the saved esp upward: four zero
//! words (edi, esi, ebx, ebp), an EFLAGS image with IF set, the entry
//! address, and a return-catcher that calls `exit` should the entry ever
//! return.
//!
//! Saving EFLAGS alongside the registers means every task resumes with
//! its own interrupt-flag state, and new tasks start preemptible without
//! needing a trampoline.
//!
//! Not reentrant; must never run in IRQ context.

use core::arch::naked_asm;

/// Switch stacks: save the callee-saved registers and EFLAGS on the
/// current stack, store esp through `old`, load esp from `new`, restore
/// and return on the other stack.
///
/// # Safety
///
/// `old` and `new` must point at the `saved_esp` fields of live tasks;
/// `new` must have been produced by a previous switch or by the spawner's
/// stack synthesis. Interrupts may be in any state; the switch itself
/// runs with them disabled and the target's EFLAGS image decides what
/// they look like afterwards.
#[unsafe(naked)]
pub unsafe extern "cdecl" fn context_switch(old: *mut usize, new: *const usize) {
    naked_asm!(
        "pushfd",
        "cli",
        "push ebp",
        "push ebx",
        "push esi",
        "push edi",
        // five pushes moved esp down 20 bytes; the return address sits
        // below the arguments.
        "mov eax, [esp + 24]", // old
        "mov [eax], esp",
        "mov eax, [esp + 28]", // new
        "mov esp, [eax]",
        "pop edi",
        "pop esi",
        "pop ebx",
        "pop ebp",
        "popfd",
        "ret",
    )
}
