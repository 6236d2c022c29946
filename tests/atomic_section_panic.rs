use lockwarden::{ATOMIC_LOCK_PREFIX, AtomicSection, Monitor};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// A panic inside the protected work must still release every resource lock
#[test]
fn test_panic_in_section_releases_all_resources() {
    let monitor = Monitor::new();
    let section = AtomicSection::new(&monitor, ["r1", "r2"]);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        section.run(|| {
            panic!("protected work failed");
        })
    }));
    assert!(outcome.is_err(), "panic should propagate out of run()");

    // A subsequent unrelated section over r1 proceeds without blocking
    let again = AtomicSection::new(&monitor, ["r1"])
        .with_timeout(Duration::from_millis(100))
        .run(|| "fine")
        .unwrap();
    assert_eq!(again, "fine");

    // And both locks are observably free
    for resource in ["r1", "r2"] {
        let lock = monitor
            .lock_by_name(&format!("{ATOMIC_LOCK_PREFIX}{resource}"))
            .expect("resource lock registered");
        assert!(!lock.is_locked(), "{resource} still held after panic");
    }
}

/// Different acquisition orders across sections are a documented deadlock
/// hazard; with a timeout both sides fail cleanly instead of hanging
#[test]
fn test_conflicting_order_fails_cleanly_with_timeout() {
    let monitor = Monitor::new();

    let m1 = monitor.clone();
    let forward = std::thread::spawn(move || {
        AtomicSection::new(&m1, ["x", "y"])
            .with_timeout(Duration::from_millis(150))
            .run(|| std::thread::sleep(Duration::from_millis(100)))
            .is_ok()
    });
    let m2 = monitor.clone();
    let backward = std::thread::spawn(move || {
        AtomicSection::new(&m2, ["y", "x"])
            .with_timeout(Duration::from_millis(150))
            .run(|| std::thread::sleep(Duration::from_millis(100)))
            .is_ok()
    });

    // Whether either side wins depends on scheduling; the contract under
    // test is that both return within their timeouts instead of hanging,
    // and that every resource lock ends up released
    let _ = forward.join().unwrap();
    let _ = backward.join().unwrap();

    for resource in ["x", "y"] {
        let lock = monitor
            .lock_by_name(&format!("{ATOMIC_LOCK_PREFIX}{resource}"))
            .expect("resource lock registered");
        assert!(!lock.is_locked(), "{resource} leaked by a failed section");
    }
}
