//! Message-passing IPC.
//!
//! Every task owns a bounded mailbox; [`send`] enqueues into the
//! destination's ring and wakes it if it was blocked. [`receive`] blocks
//! the caller until a message arrives; [`try_receive`] is its
//! non-blocking form and reports `Empty` instead.
//!
//! Ordering: FIFO per mailbox; a `send` happens-before the `receive`
//! that returns the message. A failed send leaves the ring untouched.

pub mod message;

pub use message::{Mailbox, Message, PAYLOAD_MAX, QUEUE_CAP};

use crate::error::{KernelError, KernelResult};
use crate::sched::{self, task::WAKE_ON_MESSAGE, Pid, TaskState, SCHEDULER};

/// Send up to [`PAYLOAD_MAX`] bytes to `dest`'s mailbox. Longer payloads
/// are truncated. Fails with `NoSuchPid` or `QueueFull`; either way the
/// destination ring is untouched on failure.
pub fn send(dest: Pid, bytes: &[u8]) -> KernelResult<()> {
    crate::arch::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if !sched.is_bootstrapped() {
            return Err(KernelError::NotInitialized { subsystem: "sched" });
        }
        let sender = sched.current_pid();
        sched.deliver(dest, Message::new(sender, bytes))
    })
}

/// Take the oldest queued message without blocking.
pub fn try_receive() -> KernelResult<Message> {
    crate::arch::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if !sched.is_bootstrapped() {
            return Err(KernelError::NotInitialized { subsystem: "sched" });
        }
        sched.take_message().ok_or(KernelError::Empty)
    })
}

/// Take the oldest queued message, blocking until one arrives. The only
/// thing that wakes the caller is a message delivery.
pub fn receive() -> Message {
    loop {
        let took = crate::arch::without_interrupts(|| {
            let mut sched = SCHEDULER.lock();
            if let Some(message) = sched.take_message() {
                return Some(message);
            }
            let task = sched.current_task_mut();
            task.state = TaskState::Blocked;
            task.wake_tick = WAKE_ON_MESSAGE;
            None
        });
        match took {
            Some(message) => return message,
            None => sched::yield_now(),
        }
    }
}
