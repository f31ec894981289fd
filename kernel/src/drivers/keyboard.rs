//! PS/2 keyboard input.
//!
//! The IRQ1 handler feeds raw scancodes in; they are decoded with the
//! `pc_keyboard` crate (scancode set 1, US layout) and the resulting
//! ASCII bytes land in a single-producer single-consumer ring the shell
//! drains. On non-x86 builds everything is a stub so the shell logic
//! stays compilable and testable.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86_impl {
    use core::cell::UnsafeCell;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use lazy_static::lazy_static;
    use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
    use spin::Mutex;

    /// Ring capacity; must be a power of two.
    const KEY_BUFFER_SIZE: usize = 256;

    /// Lock-free SPSC ring of decoded key bytes. Producer is the IRQ1
    /// handler, consumer is the shell task.
    struct KeyBuffer {
        buf: UnsafeCell<[u8; KEY_BUFFER_SIZE]>,
        head: AtomicUsize,
        tail: AtomicUsize,
    }

    // SAFETY: exactly one producer (IRQ context) writes `buf` at `head`
    // and one consumer reads at `tail`; the acquire/release pairs on the
    // indices order those accesses.
    unsafe impl Sync for KeyBuffer {}

    impl KeyBuffer {
        const fn new() -> Self {
            Self {
                buf: UnsafeCell::new([0; KEY_BUFFER_SIZE]),
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
            }
        }

        fn push(&self, byte: u8) {
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) & (KEY_BUFFER_SIZE - 1);
            if next == self.tail.load(Ordering::Acquire) {
                return; // full: drop the key
            }
            // SAFETY: the slot at `head` is outside the readable window
            // until the store below publishes it.
            unsafe {
                (*self.buf.get())[head] = byte;
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<u8> {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            // SAFETY: `tail != head` means the slot was published by the
            // producer's release store.
            let byte = unsafe { (*self.buf.get())[tail] };
            self.tail
                .store((tail + 1) & (KEY_BUFFER_SIZE - 1), Ordering::Release);
            Some(byte)
        }
    }

    static KEYS: KeyBuffer = KeyBuffer::new();

    lazy_static! {
        static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> =
            Mutex::new(Keyboard::new(
                ScancodeSet1::new(),
                layouts::Us104Key,
                HandleControl::Ignore,
            ));
    }

    /// Decode one scancode; called from the IRQ1 handler.
    pub fn handle_scancode(scancode: u8) {
        let mut decoder = DECODER.lock();
        if let Ok(Some(event)) = decoder.add_byte(scancode) {
            if let Some(DecodedKey::Unicode(ch)) = decoder.process_keyevent(event) {
                if ch.is_ascii() {
                    KEYS.push(ch as u8);
                }
            }
        }
    }

    /// Next decoded key, if any.
    pub fn pop_key() -> Option<u8> {
        KEYS.pop()
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use x86_impl::{handle_scancode, pop_key};

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn handle_scancode(_scancode: u8) {}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn pop_key() -> Option<u8> {
    None
}
