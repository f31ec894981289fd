//! Global tick accounting.
//!
//! The PIT fires at [`TICK_HZ`]; the IRQ0 handler calls [`tick`], which
//! advances the monotonic counter and marks the scheduler's reschedule
//! flag. Everything else (uptime display, sleep deadlines, timestamps on
//! inodes) derives from the counter.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::string::String;

/// Timer interrupt frequency in Hz.
pub const TICK_HZ: u64 = 100;

/// Monotonic tick counter, incremented from IRQ context only.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Advance the global tick and request a reschedule. IRQ context performs
/// no context switch itself.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::set_need_resched();
}

/// Ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Whole seconds since boot.
pub fn uptime_secs() -> u64 {
    ticks() / TICK_HZ
}

/// Render an uptime in seconds as `DDDd HH:MM:SS`.
pub fn format_uptime(total_secs: u64) -> String {
    use core::fmt::Write;

    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    // String's fmt::Write never fails.
    let _ = write!(out, "{:03}d {:02}:{:02}:{:02}", days, hours, minutes, seconds);
    out
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(0), "000d 00:00:00");
        assert_eq!(format_uptime(59), "000d 00:00:59");
        assert_eq!(format_uptime(3_661), "000d 01:01:01");
        assert_eq!(format_uptime(86_400 + 2 * 3_600 + 3 * 60 + 4), "001d 02:03:04");
        assert_eq!(format_uptime(123 * 86_400), "123d 00:00:00");
    }
}
