//! COM1 serial output.
//!
//! 16550-compatible UART programmed directly through port I/O; the logger
//! mirrors every record here so output survives VGA scrollback.

use core::fmt;

use spin::Mutex;

use super::port::{inb, outb};

const COM1: u16 = 0x3f8;

struct SerialPort;

static PORT: Mutex<SerialPort> = Mutex::new(SerialPort);

impl SerialPort {
    fn init(&mut self) {
        // SAFETY: standard 16550 init sequence on the COM1 register block:
        // disable interrupts, set 38400 baud, 8N1, enable+clear FIFOs.
        unsafe {
            outb(COM1 + 1, 0x00); // disable UART interrupts
            outb(COM1 + 3, 0x80); // DLAB on
            outb(COM1, 0x03); // divisor low (38400 baud)
            outb(COM1 + 1, 0x00); // divisor high
            outb(COM1 + 3, 0x03); // 8 bits, no parity, one stop
            outb(COM1 + 2, 0xc7); // FIFO enabled, cleared, 14-byte threshold
            outb(COM1 + 4, 0x0b); // DTR + RTS + OUT2
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: polls the line-status register until the transmit holding
        // register is empty, then writes the data register.
        unsafe {
            while inb(COM1 + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            outb(COM1, byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Program the UART. Called once from arch init.
pub fn init() {
    PORT.lock().init();
}

/// Write formatted text to COM1.
pub fn write_fmt(args: fmt::Arguments<'_>) {
    use core::fmt::Write;
    crate::arch::without_interrupts(|| {
        let _ = PORT.lock().write_fmt(args);
    });
}
