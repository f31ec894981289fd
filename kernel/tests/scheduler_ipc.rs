//! Scheduler dispatch policy and IPC semantics, driven step by step on a
//! standalone ring (no context switching on the host).

use onyx_kernel::ipc::{Message, PAYLOAD_MAX, QUEUE_CAP};
use onyx_kernel::sched::task::WAKE_ON_MESSAGE;
use onyx_kernel::sched::{Scheduler, TaskState, QUANTUM};
use onyx_kernel::KernelError;

fn entry() {}

fn ring_with(names: &[&'static str]) -> Scheduler {
    let mut sched = Scheduler::new();
    sched.bootstrap("idle");
    for name in names {
        sched.spawn(name, entry, 4096);
    }
    sched
}

#[test]
fn dispatch_prefers_priority_then_ring_order() {
    let mut sched = ring_with(&["a", "b"]);
    // both spawned tasks share priority 1 and beat idle (priority 0);
    // ring order decides between them
    let first = sched.step(0).expect("switch").new;
    sched.current_task_mut().time_slice = 0;
    let second = sched.step(0).expect("switch").new;
    assert_ne!(first, second);
}

#[test]
fn quantum_spends_one_tick_per_dispatch() {
    let mut sched = ring_with(&["worker"]);
    sched.step(0).expect("switch to worker");
    assert_eq!(sched.current_task_mut().time_slice, QUANTUM - 1);
    // staying on the same task still costs budget
    for expected in (0..QUANTUM - 1).rev() {
        let switch = sched.step(0);
        assert!(switch.is_none(), "no other equal-priority work to run");
        assert_eq!(sched.current_task_mut().time_slice, expected);
    }
}

#[test]
fn sleeping_task_wakes_exactly_at_deadline() {
    let mut sched = ring_with(&["sleeper"]);
    sched.step(0);
    assert_eq!(sched.current_task_mut().name, "sleeper");

    let t = sched.current_task_mut();
    t.state = TaskState::Blocked;
    t.wake_tick = 42;
    sched.step(0);
    assert_eq!(sched.current_task_mut().name, "idle");

    sched.step(41);
    assert_eq!(sched.current_task_mut().name, "idle");
    sched.step(42);
    assert_eq!(sched.current_task_mut().name, "sleeper");
}

#[test]
fn send_then_receive_round_trip() {
    let mut sched = ring_with(&["rx"]);
    sched.step(0);
    let rx = sched.current_pid();

    sched.deliver(rx, Message::new(1, b"hi")).expect("deliver");
    let msg = sched.take_message().expect("message waiting");
    assert_eq!(msg.payload(), b"hi");
    assert_eq!(msg.sender, 1);
    assert!(sched.take_message().is_none(), "delivered exactly once");
}

#[test]
fn messages_arrive_in_fifo_order() {
    let mut sched = ring_with(&["rx"]);
    sched.step(0);
    let rx = sched.current_pid();

    for i in 0..QUEUE_CAP as u8 {
        sched.deliver(rx, Message::new(1, &[i])).expect("deliver");
    }
    for i in 0..QUEUE_CAP as u8 {
        assert_eq!(sched.take_message().expect("message").payload(), &[i]);
    }
}

#[test]
fn full_mailbox_rejects_send_and_keeps_contents() {
    let mut sched = ring_with(&["rx"]);
    sched.step(0);
    let rx = sched.current_pid();

    for i in 0..QUEUE_CAP as u8 {
        sched.deliver(rx, Message::new(1, &[i])).expect("deliver");
    }
    assert_eq!(
        sched.deliver(rx, Message::new(1, b"overflow")),
        Err(KernelError::QueueFull)
    );
    // the ring is intact and still FIFO
    for i in 0..QUEUE_CAP as u8 {
        assert_eq!(sched.take_message().expect("message").payload(), &[i]);
    }
}

#[test]
fn send_to_missing_pid_is_an_error() {
    let mut sched = ring_with(&[]);
    assert_eq!(
        sched.deliver(999, Message::new(1, b"x")),
        Err(KernelError::NoSuchPid)
    );
}

#[test]
fn blocked_receiver_is_woken_by_send_only() {
    let mut sched = ring_with(&["rx"]);
    sched.step(0);
    let rx = sched.current_pid();

    let t = sched.current_task_mut();
    t.state = TaskState::Blocked;
    t.wake_tick = WAKE_ON_MESSAGE;
    sched.step(0);
    assert_eq!(sched.current_task_mut().name, "idle");

    // time alone never wakes it
    for now in 1..100 {
        sched.step(now);
        assert_eq!(sched.current_task_mut().name, "idle");
    }

    sched.deliver(rx, Message::new(1, b"wake")).expect("deliver");
    sched.step(100);
    assert_eq!(sched.current_pid(), rx);
    assert_eq!(sched.take_message().expect("message").payload(), b"wake");
}

#[test]
fn oversize_payload_is_truncated() {
    let mut sched = ring_with(&["rx"]);
    sched.step(0);
    let rx = sched.current_pid();
    let long = vec![7u8; PAYLOAD_MAX * 2];
    sched.deliver(rx, Message::new(1, &long)).expect("deliver");
    assert_eq!(sched.take_message().expect("message").payload().len(), PAYLOAD_MAX);
}

#[test]
fn exit_and_reap_reclaim_the_slot() {
    let mut sched = ring_with(&["short-lived", "other"]);
    sched.step(0);

    // terminate whichever spawned task is running
    sched.current_task_mut().state = TaskState::Terminated;
    sched.step(0);
    sched.step(0);

    let names: Vec<&str> = sched.snapshot().iter().map(|t| t.name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"idle"));
    assert!(!names.is_empty());
}
