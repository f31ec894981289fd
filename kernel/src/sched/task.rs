//! Task control blocks.
//!
//! A task owns its stack; its "context" is nothing but the saved stack
//! pointer (the callee-saved registers live on the stack itself, per the
//! switch contract in `arch::x86::context`). Tasks link into a circular
//! ready ring through slab indices rather than owning pointers.

use alloc::boxed::Box;
use alloc::vec;

use crate::ipc::Mailbox;

/// Task identifier. Monotonically increasing, never reused.
pub type Pid = u32;

/// Ticks a task may run before the scheduler passes it over until the
/// next refresh.
pub const QUANTUM: u32 = 5;

/// Priority of freshly spawned tasks; higher wins.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Priority of the boot/idle task.
pub const IDLE_PRIORITY: u8 = 0;

/// `wake_tick` value for tasks blocked on an empty mailbox; only a
/// message delivery wakes them.
pub const WAKE_ON_MESSAGE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// One entry in the scheduler's ring.
pub struct Task {
    pub pid: Pid,
    pub name: &'static str,
    pub state: TaskState,
    /// Higher value wins the dispatch.
    pub priority: u8,
    /// Remaining ticks before this task needs a refresh.
    pub time_slice: u32,
    /// Tick at which a sleeping task becomes ready again, or
    /// [`WAKE_ON_MESSAGE`].
    pub wake_tick: u64,
    /// Saved stack pointer; the whole register context per the switch
    /// contract.
    pub saved_esp: usize,
    /// Entry point, used only when the first switch lands here (kept for
    /// `ps`).
    pub entry: usize,
    /// Owned stack region; `None` for the boot task, which runs on the
    /// loader-provided stack.
    pub stack: Option<Box<[u8]>>,
    pub mailbox: Mailbox,
    /// Successor slab index in the circular ring.
    pub next: usize,
}

impl Task {
    /// The boot thread of control, adopted as a schedulable task. Its
    /// context is filled in by the first switch away from it.
    pub fn bootstrap(pid: Pid, name: &'static str) -> Self {
        Self {
            pid,
            name,
            state: TaskState::Running,
            priority: IDLE_PRIORITY,
            time_slice: QUANTUM,
            wake_tick: 0,
            saved_esp: 0,
            entry: 0,
            stack: None,
            mailbox: Mailbox::new(),
            next: 0,
        }
    }

    /// Build a kernel task with a zeroed stack and the synthesized first
    /// frame: four zero words for the callee-saved registers, an EFLAGS
    /// image with IF set, the entry address as the switch's return target,
    /// and an exit catcher underneath in case the entry ever returns.
    pub fn new_kernel(pid: Pid, name: &'static str, entry: fn(), stack_bytes: usize) -> Self {
        let stack_bytes = stack_bytes.max(4096);
        let mut stack = vec![0u8; stack_bytes].into_boxed_slice();

        const WORDS: usize = 7;
        let top = (stack.as_mut_ptr() as usize + stack_bytes) & !0xf;
        let frame_base = top - WORDS * core::mem::size_of::<usize>();

        // EFLAGS image: IF set, reserved bit 1 set.
        let frame: [usize; WORDS] = [
            0, // edi
            0, // esi
            0, // ebx
            0, // ebp
            0x202,
            entry as usize,
            task_return_catcher as usize,
        ];
        for (i, word) in frame.iter().enumerate() {
            // SAFETY: frame_base..top lies inside the freshly allocated
            // stack; nothing else references it yet.
            unsafe {
                core::ptr::write(
                    (frame_base + i * core::mem::size_of::<usize>()) as *mut usize,
                    *word,
                );
            }
        }

        Self {
            pid,
            name,
            state: TaskState::Ready,
            priority: DEFAULT_PRIORITY,
            time_slice: QUANTUM,
            wake_tick: 0,
            saved_esp: frame_base,
            entry: entry as usize,
            stack: Some(stack),
            mailbox: Mailbox::new(),
            next: 0,
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}

/// Lands here if a task's entry function returns.
extern "C" fn task_return_catcher() -> ! {
    crate::sched::exit()
}
