use lockwarden::{CancelToken, LockKind, MonitoredThread, Resolution, get_current_thread_id};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
mod common;
use common::{DEADLOCK_TIMEOUT, expect_deadlock, start_monitor};

/// The default resolution policy trips the victim's cancellation token
#[test]
fn test_victim_token_is_cancelled() {
    let harness = start_monitor();
    let monitor = &harness.monitor;

    let lock_a = monitor.create_lock("a", LockKind::Exclusive);
    let lock_b = monitor.create_lock("b", LockKind::Exclusive);

    let tokens: Arc<Mutex<HashMap<usize, CancelToken>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut spawn_side = |own: Arc<lockwarden::MonitoredLock>,
                          other: Arc<lockwarden::MonitoredLock>,
                          name: &str| {
        let monitor = Arc::clone(monitor);
        let tokens = Arc::clone(&tokens);
        MonitoredThread::spawn(&harness.monitor, name, move || {
            let tid = get_current_thread_id();
            let token = monitor.register_cancel_token(tid);
            tokens.lock().insert(tid, token.clone());

            assert!(own.acquire());
            std::thread::sleep(Duration::from_millis(100));

            // Poll the token while waiting, the cooperative way out
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while std::time::Instant::now() < deadline {
                if token.is_cancelled() {
                    own.release();
                    return true; // backed out as asked
                }
                if other.acquire_timeout(Duration::from_millis(20)) {
                    other.release();
                    own.release();
                    return false;
                }
            }
            false
        })
    };

    let t1 = spawn_side(lock_a.clone(), lock_b.clone(), "side-ab");
    let t2 = spawn_side(lock_b, lock_a, "side-ba");

    let event = expect_deadlock(&harness, DEADLOCK_TIMEOUT);

    // Both threads registered tokens, so the policy must have cancelled one
    let victim = match event.resolution {
        Resolution::Cancelled { victim } => victim,
        Resolution::LoggedOnly { victim } => {
            panic!("victim {victim} had a token but was only logged")
        }
    };
    assert!(event.thread_cycle.contains(&victim));

    let token = tokens.lock().get(&victim).cloned().expect("victim token");
    assert!(token.is_cancelled());

    // The cancelled side backs out, which unblocks the other side
    let backed_out = [t1.join().unwrap(), t2.join().unwrap()];
    assert!(backed_out.contains(&true));

    harness.monitor.stop();
}
