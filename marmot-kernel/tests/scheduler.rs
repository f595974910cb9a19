//! Scheduling behavior: quanta, priorities, waits, wakes, and reaping.

mod common;

use common::{assemble, machine, test_config};
use marmot_kernel::process::ProcessState;

#[test]
fn equal_priorities_interleave_by_quantum() {
    // Each process prints its marker seven times. With a quantum of five
    // opcodes (one spent on the movi), dispatches alternate 4/4/3/3.
    let a = assemble("6 r1, $1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n27\n");
    let b = assemble("6 r1, $2\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.run();
    assert_eq!(
        m.output.lines(),
        vec!["1", "1", "1", "1", "2", "2", "2", "2", "1", "1", "1", "2", "2", "2"]
    );
}

#[test]
fn raised_priority_wins_the_next_dispatch_pass() {
    // B raises itself to priority 10 during its first slice; from the
    // next pass on it runs ahead of A.
    let a = assemble("6 r1, $1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n27\n");
    let b = assemble("6 r2, $10\n26 r2\n6 r1, $2\n11 r1\n11 r1\n11 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.run();
    // Pass 1: A prints four 1s, B spends its slice on the priority bump
    // and two 2s. Pass 2: B first (priority 10) with its last 2, then A.
    assert_eq!(
        m.output.lines(),
        vec!["1", "1", "1", "1", "2", "2", "2", "1", "1"]
    );
}

#[test]
fn priority_is_clamped_to_31() {
    let program = assemble("6 r1, $99\n26 r1\n6 r2, $0\n25 r2\n");
    let mut m = machine(test_config(), 2048);
    let pid = m.scheduler.create_process(&program, 256).unwrap();
    assert!(m.scheduler.tick());
    let process = m.scheduler.process(pid).unwrap();
    assert_eq!(process.priority(), 31);
    assert_eq!(process.state(), ProcessState::Sleeping);
}

#[test]
fn lock_contention_hands_over_on_reap() {
    // A (priority 5) takes lock 1 and sleeps. B (priority 4) blocks on
    // the same lock with its acquire as its last executed opcode. A
    // wakes, prints, and exits; the reap frees the lock; B then claims
    // it and prints.
    let a = assemble(
        "6 r3, $5\n\
         26 r3\n\
         6 r1, $1\n\
         23 r1\n\
         6 r2, $100\n\
         25 r2\n\
         6 r4, $1\n\
         11 r4\n\
         27\n",
    );
    let b = assemble(
        "6 r3, $4\n\
         26 r3\n\
         6 r1, $1\n\
         23 r1\n\
         6 r4, $7\n\
         11 r4\n\
         27\n",
    );
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["1", "7"]);
    // Everything reaped, every lock free.
    assert_eq!(m.scheduler.process_count(), 0);
    for lock in 1..=10 {
        assert!(m.scheduler.locks().holder(lock).is_none());
    }
}

#[test]
fn waking_lock_waiter_becomes_the_recorded_holder() {
    let a = assemble("6 r1, $1\n23 r1\n27\n");
    let b = assemble("6 r1, $1\n23 r1\n6 r2, $0\n25 r2\n");
    let mut m = machine(test_config(), 2048);
    let pid_a = m.scheduler.create_process(&a, 256).unwrap();
    let pid_b = m.scheduler.create_process(&b, 256).unwrap();

    // First pass: A claims the lock and exits; B blocks on it.
    assert!(m.scheduler.tick());
    assert_eq!(m.scheduler.locks().holder(1), Some(pid_a));
    assert_eq!(
        m.scheduler.process(pid_b).unwrap().state(),
        ProcessState::WaitingOnLock
    );

    // Second pass: the reap frees A's lock; nothing is dispatchable, so
    // the idle wake scan hands the lock to B and readies it.
    assert!(m.scheduler.tick());
    assert!(m.scheduler.process(pid_a).is_none());
    assert_eq!(m.scheduler.locks().holder(1), Some(pid_b));
    assert_eq!(
        m.scheduler.process(pid_b).unwrap().state(),
        ProcessState::Ready
    );
}

#[test]
fn reacquiring_a_held_lock_is_a_noop_and_one_release_frees_it() {
    let program = assemble(
        "6 r1, $3\n\
         23 r1\n\
         23 r1\n\
         24 r1\n\
         6 r2, $1\n\
         11 r2\n\
         27\n",
    );
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&program, 256).unwrap();
    m.scheduler.run();
    // The re-acquire did not block and the single release freed it.
    assert_eq!(m.output.lines(), vec!["1"]);
    assert!(m.scheduler.locks().holder(3).is_none());
}

#[test]
fn releasing_a_lock_held_by_someone_else_is_a_noop() {
    let a = assemble("6 r1, $1\n23 r1\n6 r2, $0\n25 r2\n");
    let b = assemble("6 r1, $1\n24 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    let pid_a = m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();

    // A takes the lock and parks forever; B's release must not free it.
    assert!(m.scheduler.tick());
    assert!(m.scheduler.tick());
    assert_eq!(m.scheduler.locks().holder(1), Some(pid_a));
}

#[test]
fn out_of_range_lock_and_event_ids_are_noops() {
    let program = assemble(
        "6 r1, $11\n\
         23 r1\n\
         24 r1\n\
         30 r1\n\
         6 r2, $1\n\
         11 r2\n\
         27\n",
    );
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&program, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["1"]);
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn sleep_forever_ends_only_by_termination() {
    // P1 sleeps forever; its print can never run. P2 terminates it, so
    // the machine winds down instead of spinning.
    let sleeper = assemble("6 r1, $0\n25 r1\n6 r2, $9\n11 r2\n27\n");
    let killer = assemble("6 r1, $1\n34 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    let sleeper_pid = m.scheduler.create_process(&sleeper, 256).unwrap();
    assert_eq!(sleeper_pid.as_u32(), 1);
    m.scheduler.create_process(&killer, 256).unwrap();
    m.scheduler.run();
    assert!(m.output.lines().is_empty());
    assert_eq!(m.scheduler.process_count(), 0);
}

#[test]
fn terminating_an_unknown_pid_is_a_noop() {
    let program = assemble("6 r1, $42\n34 r1\n6 r2, $3\n11 r2\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&program, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["3"]);
}

#[test]
fn sleep_counter_wakes_the_sleeper_while_others_run() {
    // A sleeps three cycles; B burns cycles printing. A's print arrives
    // once its counter reaches zero.
    let a = assemble("6 r1, $3\n25 r1\n6 r2, $5\n11 r2\n27\n");
    let b = assemble("6 r1, $6\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n11 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.run();
    let lines = m.output.lines();
    assert!(lines.contains(&"5".to_string()));
    // B printed before A woke.
    assert_eq!(lines.first().map(String::as_str), Some("6"));
}

#[test]
fn signaling_an_event_wakes_and_preempts() {
    // A waits on event 1. B signals it mid-quantum: the wake scan readies
    // A and preempts B, so A's print lands before B's.
    let a = assemble("6 r1, $1\n31 r1\n6 r2, $5\n11 r2\n27\n");
    let b = assemble("6 r1, $1\n30 r1\n6 r2, $9\n11 r2\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["5", "9"]);
}

#[test]
fn events_are_consumed_by_the_first_woken_waiter() {
    // Two waiters, one signal each: the first signal wakes only A, the
    // second wakes B.
    let a = assemble("6 r1, $1\n31 r1\n6 r2, $5\n11 r2\n27\n");
    let b = assemble("6 r1, $1\n31 r1\n6 r2, $6\n11 r2\n27\n");
    let c = assemble("6 r1, $1\n30 r1\n6 r1, $1\n30 r1\n27\n");
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&a, 256).unwrap();
    m.scheduler.create_process(&b, 256).unwrap();
    m.scheduler.create_process(&c, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["5", "6"]);
    assert!(!m.scheduler.events().is_signaled(1));
}

#[test]
fn shared_memory_and_events_pass_a_value_between_processes() {
    // The writer maps shared region 1, stores 88, and signals; the
    // reader wakes, maps the same region, and prints what it finds.
    let writer = assemble(
        "6 r1, $1\n\
         29 r1, r2\n\
         6 r3, $88\n\
         9 r2, r3\n\
         6 r4, $1\n\
         30 r4\n\
         27\n",
    );
    let reader = assemble(
        "6 r1, $1\n\
         31 r1\n\
         6 r2, $1\n\
         29 r2, r3\n\
         8 r4, r3\n\
         11 r4\n\
         27\n",
    );
    let mut m = machine(test_config(), 2048);
    m.scheduler.create_process(&writer, 256).unwrap();
    m.scheduler.create_process(&reader, 256).unwrap();
    m.scheduler.run();
    assert_eq!(m.output.lines(), vec!["88"]);
    // Both mappers are gone; no shared page still names them.
    assert!(
        m.scheduler
            .memory()
            .pages()
            .iter()
            .all(|p| p.shared_owners.is_empty())
    );
}
