//! OnyxOS kernel library.
//!
//! A 32-bit x86 Multiboot kernel: physical frame allocator, two-level
//! paging with a lazily-faulted dynamic region, free-list heap,
//! preemptive round-robin scheduler with mailbox IPC, and a writable
//! ext2 filesystem on a RAM-backed block device behind a small VFS.
//!
//! The crate also compiles for the host so the portable subsystems run
//! under the standard test harness; bare-metal-only pieces are gated on
//! `target_arch = "x86"` / `target_os = "none"`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(
    all(target_os = "none", target_arch = "x86"),
    feature(abi_x86_interrupt)
)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod ipc;
pub mod log_service;
pub mod mm;
pub mod sched;
pub mod services;
pub mod timer;

pub use error::{KernelError, KernelResult};

/// The kernel heap is the global allocator on bare metal; host builds
/// (tests) use the system allocator that comes with std.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: mm::heap::LockedHeap = mm::heap::LockedHeap::empty();

/// Access the global heap for init and stats.
#[cfg(target_os = "none")]
pub fn heap_allocator() -> &'static mm::heap::LockedHeap {
    &ALLOCATOR
}

/// Heap allocation failure is unrecoverable in a kernel.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}

/// Host-side sink for the `print!`/`println!` macros.
#[cfg(not(all(target_arch = "x86", target_os = "none")))]
#[doc(hidden)]
pub fn host_print(args: core::fmt::Arguments<'_>) {
    use std::io::Write;
    let _ = std::io::stdout().write_fmt(args);
}
