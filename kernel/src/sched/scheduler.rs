//! The ready ring and the scheduling step.
//!
//! Tasks live in a slab of `Option<Box<Task>>`; the circular list is the
//! `next` indices threaded through them. Exactly one task is `Running`
//! whenever anything is runnable. The step never runs in IRQ context; the
//! timer only marks `need_reschedule`.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::task::{Task, TaskState, QUANTUM, WAKE_ON_MESSAGE};
use super::Pid;
use crate::error::{KernelError, KernelResult};
use crate::ipc::Message;

/// Outcome of a scheduling step: slab indices of the outgoing and
/// incoming tasks. `None` means the current task keeps the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub old: usize,
    pub new: usize,
}

/// Snapshot row for `ps`.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub pid: Pid,
    pub name: &'static str,
    pub state: TaskState,
    pub priority: u8,
    pub time_slice: u32,
    pub queued_messages: usize,
}

pub struct Scheduler {
    slots: Vec<Option<Box<Task>>>,
    /// Slab index of the running task.
    current: usize,
    next_pid: Pid,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            current: 0,
            next_pid: 1,
        }
    }

    /// Adopt the calling thread of control as the first (idle) task.
    pub fn bootstrap(&mut self, name: &'static str) -> Pid {
        let pid = self.alloc_pid();
        let task = Task::bootstrap(pid, name);
        self.slots.push(Some(Box::new(task)));
        self.current = 0;
        pid
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn is_bootstrapped(&self) -> bool {
        !self.slots.is_empty()
    }

    fn free_slot(&mut self) -> usize {
        if let Some(idx) = self.slots.iter().position(Option::is_none) {
            idx
        } else {
            self.slots.push(None);
            self.slots.len() - 1
        }
    }

    fn task(&self, idx: usize) -> &Task {
        self.slots[idx].as_deref().expect("ring index points at live task")
    }

    fn task_mut(&mut self, idx: usize) -> &mut Task {
        self.slots[idx].as_deref_mut().expect("ring index points at live task")
    }

    /// Insert a task into the ring, directly after the current task.
    pub fn insert(&mut self, mut task: Task) -> Pid {
        let pid = task.pid;
        let idx = self.free_slot();
        task.next = self.task(self.current).next;
        self.slots[idx] = Some(Box::new(task));
        self.task_mut(self.current).next = idx;
        pid
    }

    /// Create and enqueue a kernel task.
    pub fn spawn(&mut self, name: &'static str, entry: fn(), stack_bytes: usize) -> Pid {
        let pid = self.alloc_pid();
        let task = Task::new_kernel(pid, name, entry, stack_bytes);
        self.insert(task)
    }

    pub fn current_pid(&self) -> Pid {
        self.task(self.current).pid
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        let idx = self.current;
        self.task_mut(idx)
    }

    fn find_pid(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_deref().is_some_and(|t| t.pid == pid))
    }

    /// Deliver a message to `dest`'s mailbox, waking it if it is blocked.
    /// This is the only wake path besides the sleep deadline.
    pub fn deliver(&mut self, dest: Pid, message: Message) -> KernelResult<()> {
        let idx = self.find_pid(dest).ok_or(KernelError::NoSuchPid)?;
        let task = self.task_mut(idx);
        task.mailbox.push(message)?;
        if task.state == TaskState::Blocked {
            task.state = TaskState::Ready;
            task.wake_tick = 0;
        }
        Ok(())
    }

    /// Pop the oldest message queued for the current task.
    pub fn take_message(&mut self) -> Option<Message> {
        self.current_task_mut().mailbox.pop()
    }

    /// Unlink and drop terminated tasks. The current slot is skipped: the
    /// CPU may still be on that stack, so it is reaped by a later step
    /// running on another task's stack.
    fn reap(&mut self) {
        let mut prev = self.current;
        let mut idx = self.task(self.current).next;
        while idx != self.current {
            let next = self.task(idx).next;
            if self.task(idx).state == TaskState::Terminated {
                self.task_mut(prev).next = next;
                let task = self.slots[idx].take();
                drop(task);
            } else {
                prev = idx;
            }
            idx = next;
        }
    }

    /// Move sleepers whose deadline has passed back to `Ready`.
    fn wake_sleepers(&mut self, now: u64) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.state == TaskState::Blocked
                && slot.wake_tick != WAKE_ON_MESSAGE
                && slot.wake_tick <= now
            {
                slot.state = TaskState::Ready;
                slot.wake_tick = 0;
            }
        }
    }

    /// Pick the highest-priority runnable task with slice budget, scanning
    /// the ring from `current.next`; ties go to the first one found.
    fn select(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut idx = self.task(self.current).next;
        loop {
            let task = self.task(idx);
            if task.is_runnable() && task.time_slice > 0 {
                let better = match best {
                    Some(b) => task.priority > self.task(b).priority,
                    None => true,
                };
                if better {
                    best = Some(idx);
                }
            }
            if idx == self.current {
                break;
            }
            idx = task.next;
        }
        best
    }

    fn refresh_slices(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            if matches!(slot.state, TaskState::Ready | TaskState::Running) {
                slot.time_slice = QUANTUM;
            }
        }
    }

    /// One scheduling step: reap, wake, pick, and account. Returns the
    /// switch to perform, or `None` when the current task continues.
    pub fn step(&mut self, now: u64) -> Option<Switch> {
        self.reap();
        self.wake_sleepers(now);

        let chosen = match self.select() {
            Some(idx) => idx,
            None => {
                self.refresh_slices();
                self.select()?
            }
        };

        if chosen == self.current {
            let task = self.task_mut(chosen);
            task.time_slice = task.time_slice.saturating_sub(1);
            return None;
        }

        let old = self.current;
        {
            let old_task = self.task_mut(old);
            if old_task.state == TaskState::Running {
                old_task.state = TaskState::Ready;
            }
        }
        {
            let new_task = self.task_mut(chosen);
            new_task.state = TaskState::Running;
            new_task.time_slice -= 1;
        }
        self.current = chosen;
        Some(Switch { old, new: chosen })
    }

    /// Raw pointers to the saved stack-pointer cells of a switch pair, for
    /// the context-switch primitive.
    pub fn context_cells(&mut self, switch: Switch) -> (*mut usize, *const usize) {
        let old: *mut usize = core::ptr::addr_of_mut!(self.task_mut(switch.old).saved_esp);
        let new: *const usize = core::ptr::addr_of!(self.task(switch.new).saved_esp);
        (old, new)
    }

    /// Snapshot of every live task for `ps`.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.slots
            .iter()
            .flatten()
            .map(|t| TaskInfo {
                pid: t.pid,
                name: t.name,
                state: t.state,
                priority: t.priority,
                time_slice: t.time_slice,
                queued_messages: t.mailbox.len(),
            })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn noop() {}

    fn ring() -> Scheduler {
        let mut s = Scheduler::new();
        s.bootstrap("idle");
        s
    }

    #[test]
    fn bootstrap_is_running_and_self_linked() {
        let s = ring();
        assert_eq!(s.current_pid(), 1);
        assert_eq!(s.task(0).next, 0);
        assert_eq!(s.task(0).state, TaskState::Running);
    }

    #[test]
    fn spawned_task_preempts_idle() {
        let mut s = ring();
        let pid = s.spawn("worker", noop, 4096);
        let switch = s.step(0).expect("higher-priority task wins the dispatch");
        assert_eq!(s.current_pid(), pid);
        assert_eq!(s.task(switch.old).state, TaskState::Ready);
        assert_eq!(s.task(switch.new).state, TaskState::Running);
    }

    #[test]
    fn round_robin_between_equal_priorities() {
        let mut s = ring();
        let a = s.spawn("a", noop, 4096);
        let b = s.spawn("b", noop, 4096);

        let mut seen = alloc::vec::Vec::new();
        for _ in 0..2 {
            s.step(0);
            // burn the new task's whole slice so the next step moves on
            s.current_task_mut().time_slice = 0;
            seen.push(s.current_pid());
        }
        assert!(seen.contains(&a) && seen.contains(&b));
    }

    #[test]
    fn exhausted_slices_get_refreshed() {
        let mut s = ring();
        s.spawn("worker", noop, 4096);
        s.step(0);
        s.current_task_mut().time_slice = 0;
        // idle (priority 0) still has budget, so the worker's exhaustion
        // hands the CPU back to idle...
        let switch = s.step(0).expect("switch to idle");
        assert_eq!(s.task(switch.new).priority, super::super::task::IDLE_PRIORITY);
        // ...and once everyone is exhausted, slices refresh and the worker
        // runs again.
        s.current_task_mut().time_slice = 0;
        s.step(0);
        assert_eq!(s.current_task_mut().name, "worker");
        assert_eq!(s.current_task_mut().time_slice, QUANTUM - 1);
    }

    #[test]
    fn sleeper_wakes_before_dispatch() {
        let mut s = ring();
        let pid = s.spawn("sleeper", noop, 4096);
        s.step(0);
        assert_eq!(s.current_pid(), pid);

        // put it to sleep until tick 10
        {
            let t = s.current_task_mut();
            t.state = TaskState::Blocked;
            t.wake_tick = 10;
        }
        s.step(0);
        assert_ne!(s.current_pid(), pid);

        // deadline not reached: still blocked
        s.step(9);
        assert_ne!(s.current_pid(), pid);

        // deadline reached: woken and dispatched in the same step
        s.step(10);
        assert_eq!(s.current_pid(), pid);
    }

    #[test]
    fn terminated_tasks_are_reaped_off_their_stack() {
        let mut s = ring();
        let pid = s.spawn("dying", noop, 4096);
        s.step(0);
        assert_eq!(s.current_pid(), pid);

        s.current_task_mut().state = TaskState::Terminated;
        s.step(0); // switches away; cannot reap the stack in use
        assert!(s.find_pid(pid).is_some());

        s.step(0); // now running elsewhere; the corpse goes away
        assert!(s.find_pid(pid).is_none());
        // ring is closed again
        assert_eq!(s.task(s.current).next, s.current);
    }

    #[test]
    fn priority_wins_within_each_refresh_window() {
        let mut s = ring();
        s.spawn("low", noop, 4096);
        let high = {
            let pid = s.alloc_pid();
            let mut t = Task::new_kernel(pid, "high", noop, 4096);
            t.priority = 5;
            s.insert(t)
        };

        s.step(0);
        assert_eq!(s.current_pid(), high);
        // while "high" has slice budget it keeps winning
        for now in 1..4 {
            s.step(now);
            assert_eq!(s.current_pid(), high);
        }

        // once its budget is gone, lower-priority work gets the CPU
        s.current_task_mut().time_slice = 0;
        s.step(4);
        assert_eq!(s.current_task_mut().name, "low");
        s.current_task_mut().time_slice = 0;
        s.step(5);
        assert_eq!(s.current_task_mut().name, "idle");

        // with everyone exhausted the slices refresh and priority rules
        // again
        s.current_task_mut().time_slice = 0;
        s.step(6);
        assert_eq!(s.current_pid(), high);
        assert_eq!(s.current_task_mut().time_slice, QUANTUM - 1);
    }

    #[test]
    fn message_delivery_wakes_blocked_receiver() {
        let mut s = ring();
        let pid = s.spawn("rx", noop, 4096);
        s.step(0);

        {
            let t = s.current_task_mut();
            t.state = TaskState::Blocked;
            t.wake_tick = WAKE_ON_MESSAGE;
        }
        s.step(0);
        assert_ne!(s.current_pid(), pid);
        // the timer never wakes a message-blocked task
        s.step(1_000_000);
        assert_ne!(s.current_pid(), pid);

        s.deliver(pid, Message::new(1, b"hi")).expect("deliver");
        s.step(1_000_001);
        assert_eq!(s.current_pid(), pid);
        let m = s.take_message().expect("queued message");
        assert_eq!(m.payload(), b"hi");
        assert_eq!(m.sender, 1);
        assert!(s.take_message().is_none(), "a message is received exactly once");
    }

    #[test]
    fn deliver_to_unknown_pid_fails() {
        let mut s = ring();
        assert_eq!(
            s.deliver(42, Message::new(1, b"x")),
            Err(KernelError::NoSuchPid)
        );
    }
}
