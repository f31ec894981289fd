//! 8253/8254 programmable interval timer.
//!
//! Channel 0 drives IRQ 0 in rate-generator mode at [`crate::timer::TICK_HZ`].

use super::port::outb;
use crate::timer::TICK_HZ;

const PIT_CH0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;

/// Input clock of the PIT in Hz.
const PIT_BASE_HZ: u64 = 1_193_182;

/// Program channel 0 for periodic ticks.
pub fn init() {
    let divisor = (PIT_BASE_HZ / TICK_HZ) as u16;
    // SAFETY: command 0x36 selects channel 0, lobyte/hibyte access, mode 3
    // (square wave); the two data writes load the divisor.
    unsafe {
        outb(PIT_CMD, 0x36);
        outb(PIT_CH0, (divisor & 0xff) as u8);
        outb(PIT_CH0, (divisor >> 8) as u8);
    }
}
