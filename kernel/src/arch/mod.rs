//! Architecture support.
//!
//! The kernel proper targets 32-bit x86; everything that touches
//! privileged instructions lives under [`x86`] and is compiled only for
//! the bare-metal build. Host builds (unit and integration tests) get the
//! no-op fallbacks below so the portable subsystems run unmodified.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86::{enable_interrupts, halt, idle_wait, without_interrupts};

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod host {
    /// Run `f` as a critical section. The host has no interrupt flag to
    /// toggle, so this is just a call.
    pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
        f()
    }

    /// Fatal stop. Host builds only reach this from code paths that a
    /// test has driven into a condition the kernel would halt on.
    pub fn halt() -> ! {
        panic!("kernel halt");
    }

    /// Relax while idle.
    pub fn idle_wait() {
        core::hint::spin_loop();
    }

    pub fn enable_interrupts() {}
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use host::{enable_interrupts, halt, idle_wait, without_interrupts};
