//! Preemptive round-robin scheduling.
//!
//! The timer IRQ only sets a flag; all switching happens at cooperative
//! points (`yield_now`, `maybe_resched`, `sleep`, `exit`, blocking
//! receive) with interrupts disabled around the bookkeeping.

pub mod scheduler;
pub mod task;

use core::sync::atomic::{AtomicBool, Ordering};

use alloc::vec::Vec;

use spin::Mutex;

pub use scheduler::{Scheduler, Switch, TaskInfo};
pub use task::{Pid, Task, TaskState, DEFAULT_PRIORITY, QUANTUM};

/// The global task ring.
pub static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Set from the timer IRQ; consumed by [`maybe_resched`].
static NEED_RESCHED: AtomicBool = AtomicBool::new(false);

/// Adopt the boot thread as the idle task.
pub fn init() {
    let pid = crate::arch::without_interrupts(|| SCHEDULER.lock().bootstrap("idle"));
    log::info!("sched: boot task adopted as idle (pid {})", pid);
}

/// Create a kernel task with its own stack.
pub fn spawn(name: &'static str, entry: fn(), stack_bytes: usize) -> Pid {
    crate::arch::without_interrupts(|| SCHEDULER.lock().spawn(name, entry, stack_bytes))
}

/// Mark that the next cooperative point should run the scheduler. Called
/// from the timer IRQ.
pub fn set_need_resched() {
    NEED_RESCHED.store(true, Ordering::Release);
}

/// Pid of the running task.
pub fn current_pid() -> Pid {
    crate::arch::without_interrupts(|| {
        let sched = SCHEDULER.lock();
        if sched.is_bootstrapped() {
            sched.current_pid()
        } else {
            0
        }
    })
}

/// Snapshot for `ps`.
pub fn tasks_snapshot() -> Vec<TaskInfo> {
    crate::arch::without_interrupts(|| SCHEDULER.lock().snapshot())
}

/// Voluntarily give up the CPU: always runs a scheduler step.
pub fn yield_now() {
    schedule();
}

/// Cooperative preemption point: runs a step only if the timer asked for
/// one since the last check.
pub fn maybe_resched() {
    if NEED_RESCHED.swap(false, Ordering::AcqRel) {
        schedule();
    }
}

/// Block the current task for `ticks` timer ticks.
pub fn sleep(ticks: u64) {
    crate::arch::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if !sched.is_bootstrapped() {
            return;
        }
        let now = crate::timer::ticks();
        let task = sched.current_task_mut();
        task.state = TaskState::Blocked;
        task.wake_tick = now + ticks;
    });
    schedule();
}

/// Terminate the current task; it never resumes. The stack and task
/// struct are reclaimed by a later scheduler step running on another
/// stack.
pub fn exit() -> ! {
    crate::arch::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if sched.is_bootstrapped() {
            sched.current_task_mut().state = TaskState::Terminated;
        }
    });
    loop {
        schedule();
        // Only reachable if the scheduler had nothing else to run, which
        // cannot happen while the idle task lives; spin until it does.
        crate::arch::idle_wait();
    }
}

/// Run one scheduler step and perform the context switch it decides on.
fn schedule() {
    crate::arch::without_interrupts(|| {
        let decision = {
            let mut sched = SCHEDULER.lock();
            if !sched.is_bootstrapped() {
                return;
            }
            let now = crate::timer::ticks();
            match sched.step(now) {
                Some(switch) => Some(sched.context_cells(switch)),
                None => None,
            }
        };

        #[cfg(all(target_arch = "x86", target_os = "none"))]
        if let Some((old, new)) = decision {
            // SAFETY: the cells come from live boxed tasks the scheduler
            // just linked into the switch; the lock is released, interrupts
            // are off, and we are not in IRQ context.
            unsafe {
                crate::arch::x86::context::context_switch(old, new);
            }
        }

        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        let _ = decision;
    });
}
