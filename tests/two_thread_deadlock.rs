use lockwarden::{LockKind, MonitoredThread};
use std::time::Duration;
mod common;
use common::{DEADLOCK_TIMEOUT, NO_DEADLOCK_TIMEOUT, expect_deadlock, start_monitor};

#[test]
fn test_two_thread_deadlock_detected_once() {
    let harness = start_monitor();
    let monitor = &harness.monitor;

    let lock_a = monitor.create_lock("resource-a", LockKind::Exclusive);
    let lock_b = monitor.create_lock("resource-b", LockKind::Exclusive);

    let a1 = lock_a.clone();
    let b1 = lock_b.clone();
    // Thread 1: lock A, then try to lock B
    let _thread1 = MonitoredThread::spawn(monitor, "t1", move || {
        assert!(a1.acquire());
        // Give thread 2 time to acquire lock B
        std::thread::sleep(Duration::from_millis(100));
        // This acquisition completes the cycle
        block_on_lock(&b1);
    });

    let a2 = lock_a.clone();
    let b2 = lock_b.clone();
    // Thread 2: lock B, then try to lock A
    let _thread2 = MonitoredThread::spawn(monitor, "t2", move || {
        assert!(b2.acquire());
        std::thread::sleep(Duration::from_millis(100));
        block_on_lock(&a2);
    });

    let event = expect_deadlock(&harness, DEADLOCK_TIMEOUT);
    assert_eq!(event.thread_cycle.len(), 2);
    assert_eq!(event.cycle_edges.len(), 2);
    assert!(!event.graph.edges.is_empty());
    assert!(event.description.contains("deadlock cycle"));

    // The cycle persists, but it must not be re-reported every tick
    assert!(
        harness.events.recv_timeout(NO_DEADLOCK_TIMEOUT).is_err(),
        "persisting cycle was reported twice"
    );
    assert_eq!(monitor.statistics().total_deadlocks, 1);
    assert_eq!(monitor.deadlock_events().len(), 1);

    monitor.stop();
}

fn block_on_lock(lock: &lockwarden::MonitoredLock) {
    // Bounded so the leaked threads unwind once the test is over
    let _ = lock.acquire_timeout(Duration::from_secs(10));
}
