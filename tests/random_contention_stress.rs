use lockwarden::{LockKind, MonitoredThread};
use rand::Rng;
use std::time::Duration;
mod common;
use common::{NO_DEADLOCK_TIMEOUT, assert_no_deadlock, start_monitor};

/// Heavy random contention with a globally consistent acquisition order
/// must never produce a deadlock event, no matter how the scheduler
/// interleaves the threads
#[test]
fn test_random_ordered_contention_is_deadlock_free() {
    let harness = start_monitor();
    let monitor = &harness.monitor;

    const LOCKS: usize = 5;
    const THREADS: usize = 6;
    const ROUNDS: usize = 30;

    let locks: Vec<_> = (0..LOCKS)
        .map(|i| monitor.create_lock(format!("stress-{i}"), LockKind::Exclusive))
        .collect();

    let mut handles = vec![];
    for t in 0..THREADS {
        let locks = locks.clone();
        handles.push(MonitoredThread::spawn(
            monitor,
            format!("stress-worker-{t}"),
            move || {
                let mut rng = rand::rng();
                for _ in 0..ROUNDS {
                    // Pick two distinct locks and take them in index order
                    let mut first = rng.random_range(0..LOCKS);
                    let mut second = rng.random_range(0..LOCKS);
                    if first == second {
                        continue;
                    }
                    if first > second {
                        std::mem::swap(&mut first, &mut second);
                    }

                    assert!(locks[first].acquire());
                    assert!(locks[second].acquire());
                    std::thread::sleep(Duration::from_micros(200));
                    locks[second].release();
                    locks[first].release();
                }
            },
        ));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_no_deadlock(&harness, NO_DEADLOCK_TIMEOUT);
    monitor.stop();

    // Sanity: the run actually produced contention worth monitoring
    let stats = monitor.statistics();
    assert_eq!(stats.total_locks, LOCKS as u64);
    assert!(stats.total_threads >= THREADS as u64);
}
