//! VGA text-mode console.
//!
//! 80x25 character buffer at physical 0xb8000, scrolled in software. The
//! writer backs the `print!`/`println!` macros.

use core::{fmt, ptr::write_volatile};

use lazy_static::lazy_static;
use spin::Mutex;

/// VGA text-mode color palette. Not all variants are used but the full
/// 16-color palette is defined per the VGA specification.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

#[repr(transparent)]
struct Buffer {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    column_position: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            0x08 => self.backspace(),
            byte => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = BUFFER_HEIGHT - 1;
                let col = self.column_position;

                let color_code = self.color_code;
                // SAFETY: the VGA buffer at 0xb8000 is memory-mapped I/O;
                // write_volatile keeps the store. row/col are in bounds by the
                // checks above.
                unsafe {
                    write_volatile(
                        &mut self.buffer.chars[row][col],
                        ScreenChar {
                            ascii_character: byte,
                            color_code,
                        },
                    );
                }
                self.column_position += 1;
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                // printable ASCII, newline or backspace
                0x20..=0x7e | b'\n' | 0x08 => self.write_byte(byte),
                // fall back to a block character
                _ => self.write_byte(0xfe),
            }
        }
        self.update_cursor();
    }

    fn backspace(&mut self) {
        if self.column_position == 0 {
            return;
        }
        self.column_position -= 1;
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        // SAFETY: volatile store inside the 80x25 buffer; column was just
        // decremented so it is in range.
        unsafe {
            write_volatile(
                &mut self.buffer.chars[BUFFER_HEIGHT - 1][self.column_position],
                blank,
            );
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                // SAFETY: volatile copies within the 80x25 buffer; row starts
                // at 1 so row-1 is valid.
                let character = unsafe { core::ptr::read_volatile(&self.buffer.chars[row][col]) };
                unsafe {
                    write_volatile(&mut self.buffer.chars[row - 1][col], character);
                }
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.column_position = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            // SAFETY: volatile store bounded by BUFFER_WIDTH/BUFFER_HEIGHT.
            unsafe {
                write_volatile(&mut self.buffer.chars[row][col], blank);
            }
        }
    }

    /// Blank the whole screen (shell `clear`).
    pub fn clear_screen(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.column_position = 0;
        self.update_cursor();
    }

    /// Move the hardware cursor to the current output position.
    fn update_cursor(&self) {
        let pos = ((BUFFER_HEIGHT - 1) * BUFFER_WIDTH + self.column_position) as u16;
        // SAFETY: ports 0x3d4/0x3d5 are the VGA CRT controller index/data
        // registers; writing the cursor location registers is side-effect-free
        // beyond moving the cursor.
        unsafe {
            super::port::outb(0x3d4, 0x0f);
            super::port::outb(0x3d5, (pos & 0xff) as u8);
            super::port::outb(0x3d4, 0x0e);
            super::port::outb(0x3d5, (pos >> 8) as u8);
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        column_position: 0,
        color_code: ColorCode::new(Color::LightGray, Color::Black),
        // SAFETY: 0xb8000 is the identity-mapped VGA text buffer; nothing
        // else aliases it as a Rust reference.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    use core::fmt::Write;
    // The writer is also used from interrupt handlers (logging), so the
    // lock is only taken with interrupts off.
    crate::arch::without_interrupts(|| {
        let _ = WRITER.lock().write_fmt(args);
    });
}

/// Blank the screen.
pub fn clear() {
    crate::arch::without_interrupts(|| {
        WRITER.lock().clear_screen();
    });
}
