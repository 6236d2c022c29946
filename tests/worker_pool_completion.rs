use anyhow::anyhow;
use lockwarden::{Monitor, TaskState, WorkerPool};
use std::time::{Duration, Instant};

/// 10 tasks into a 4-worker pool: after shutdown every task is accounted for
#[test]
fn test_all_submitted_tasks_are_accounted_for() {
    let monitor = Monitor::new();
    let pool = WorkerPool::new(&monitor);
    pool.start(4);

    let mut ids = vec![];
    for i in 0..10 {
        ids.push(pool.submit(move || {
            if i % 3 == 0 {
                Err(anyhow!("task {i} rejected"))
            } else {
                Ok(())
            }
        }));
    }

    // Wait for the queue to drain before signalling shutdown
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let stats = pool.statistics();
        if stats.completed + stats.failed == 10 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.stop();

    let stats = pool.statistics();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.completed + stats.failed, 10);
    assert_eq!(stats.failed, 4); // i = 0, 3, 6, 9
    assert_eq!(stats.pending, 0);

    // Every task is still queryable after shutdown
    for id in ids {
        let status = pool.task_status(id).expect("tasks are never evicted");
        assert!(matches!(
            status.state,
            TaskState::Completed | TaskState::Failed
        ));
    }

    // The pool's workers went through the monitor's registry
    assert!(monitor.statistics().total_threads >= 4);
}

#[test]
fn test_tasks_submitted_while_running_complete() {
    let monitor = Monitor::new();
    let pool = WorkerPool::new(&monitor);
    pool.start(2);

    for _ in 0..5 {
        pool.submit(|| Ok(()));
        std::thread::sleep(Duration::from_millis(5));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.statistics().completed < 5 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    pool.stop();

    assert_eq!(pool.statistics().completed, 5);
}
