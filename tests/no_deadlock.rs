use lockwarden::{LockKind, MonitoredThread};
use std::time::Duration;
mod common;
use common::{NO_DEADLOCK_TIMEOUT, assert_no_deadlock, start_monitor};

#[test]
fn test_sequential_lockers_produce_no_events() {
    let harness = start_monitor();
    let monitor = &harness.monitor;

    let lock_a = monitor.create_lock("a", LockKind::Exclusive);
    let lock_b = monitor.create_lock("b", LockKind::Exclusive);

    // Both threads take the locks in the same order, so waiting happens but
    // no cycle can form
    let mut handles = vec![];
    for i in 0..2 {
        let a = lock_a.clone();
        let b = lock_b.clone();
        handles.push(MonitoredThread::spawn(
            monitor,
            format!("orderly-{i}"),
            move || {
                for _ in 0..20 {
                    assert!(a.acquire());
                    assert!(b.acquire());
                    std::thread::sleep(Duration::from_millis(2));
                    b.release();
                    a.release();
                }
            },
        ));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_no_deadlock(&harness, NO_DEADLOCK_TIMEOUT);
    assert!(harness.monitor.deadlock_events().is_empty());
    // The loop kept ticking the whole time
    assert!(harness.monitor.tick_count() > 0);

    harness.monitor.stop();
}
