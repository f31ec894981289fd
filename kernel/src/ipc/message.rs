//! IPC message and mailbox types.

use crate::error::{KernelError, KernelResult};
use crate::sched::Pid;

/// Largest payload a message can carry.
pub const PAYLOAD_MAX: usize = 32;

/// Messages a mailbox can hold before `send` fails.
pub const QUEUE_CAP: usize = 8;

/// A fixed-size message. Created by `send`, consumed by `receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: Pid,
    len: u8,
    payload: [u8; PAYLOAD_MAX],
}

impl Message {
    const EMPTY: Message = Message {
        sender: 0,
        len: 0,
        payload: [0; PAYLOAD_MAX],
    };

    /// Build a message, truncating `bytes` to [`PAYLOAD_MAX`].
    pub fn new(sender: Pid, bytes: &[u8]) -> Self {
        let len = bytes.len().min(PAYLOAD_MAX);
        let mut payload = [0; PAYLOAD_MAX];
        payload[..len].copy_from_slice(&bytes[..len]);
        Self {
            sender,
            len: len as u8,
            payload,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.len)]
    }
}

/// Bounded per-task message ring. `head` is the producer index, `tail`
/// the consumer index; both wrap at [`QUEUE_CAP`].
#[derive(Debug)]
pub struct Mailbox {
    ring: [Message; QUEUE_CAP],
    head: usize,
    tail: usize,
    count: usize,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            ring: [Message::EMPTY; QUEUE_CAP],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Enqueue a message. A full ring is left completely untouched.
    pub fn push(&mut self, message: Message) -> KernelResult<()> {
        if self.count == QUEUE_CAP {
            return Err(KernelError::QueueFull);
        }
        self.ring[self.head] = message;
        self.head = (self.head + 1) % QUEUE_CAP;
        self.count += 1;
        Ok(())
    }

    /// Dequeue the oldest message.
    pub fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let message = self.ring[self.tail];
        self.tail = (self.tail + 1) % QUEUE_CAP;
        self.count -= 1;
        Some(message)
    }

    /// Producer/consumer indices, for checking that failed sends leave
    /// the ring untouched.
    pub fn indices(&self) -> (usize, usize) {
        (self.head, self.tail)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut mb = Mailbox::new();
        for i in 0..5u8 {
            mb.push(Message::new(1, &[i])).expect("push within capacity");
        }
        for i in 0..5u8 {
            let m = mb.pop().expect("queued message");
            assert_eq!(m.payload(), &[i]);
            assert_eq!(m.sender, 1);
        }
        assert!(mb.pop().is_none());
    }

    #[test]
    fn full_ring_rejects_and_preserves_indices() {
        let mut mb = Mailbox::new();
        for i in 0..QUEUE_CAP as u8 {
            mb.push(Message::new(2, &[i])).expect("push within capacity");
        }
        let before = mb.indices();
        assert_eq!(mb.push(Message::new(2, b"extra")), Err(KernelError::QueueFull));
        assert_eq!(mb.indices(), before);
        assert_eq!(mb.len(), QUEUE_CAP);
        // the queued contents survive intact, in order
        for i in 0..QUEUE_CAP as u8 {
            assert_eq!(mb.pop().expect("message").payload(), &[i]);
        }
    }

    #[test]
    fn payload_truncated_to_max() {
        let long = [0xabu8; PAYLOAD_MAX + 10];
        let m = Message::new(3, &long);
        assert_eq!(m.payload().len(), PAYLOAD_MAX);
    }

    #[test]
    fn wraparound_keeps_order() {
        let mut mb = Mailbox::new();
        for round in 0..3u8 {
            for i in 0..QUEUE_CAP as u8 {
                mb.push(Message::new(1, &[round, i])).expect("push");
            }
            for i in 0..QUEUE_CAP as u8 {
                assert_eq!(mb.pop().expect("message").payload(), &[round, i]);
            }
        }
    }
}
