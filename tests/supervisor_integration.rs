//! Integration tests for the timeout supervisor
//!
//! These run real work on real clocks: a CPU-bound loop charged against the
//! process CPU clock, and a sleeper charged against the wall clock.

use evalbox::core::supervisor::TimeoutSupervisor;
use evalbox::core::types::{Budget, SupervisorOutcome, WorkUnit};
use std::time::{Duration, Instant};

#[test]
fn test_busy_loop_is_abandoned_past_hard_limit() {
    let supervisor = TimeoutSupervisor::new();
    let work = WorkUnit::new("busy loop", |_cancel| {
        // Never looks at the cancel token; gives up on its own after a while
        let start = Instant::now();
        let mut acc = 0u64;
        while start.elapsed() < Duration::from_secs(8) {
            acc = std::hint::black_box(acc.wrapping_add(1));
        }
        Ok(acc)
    });

    let outcome = supervisor.run(work, Budget::from_secs_f64(1.0));
    match outcome {
        SupervisorOutcome::Terminated { elapsed } => {
            assert!(elapsed >= Duration::from_millis(1500), "terminated after {:?}", elapsed);
        }
        other => panic!("expected Terminated, got {:?}", other.kind()),
    }
}

#[test]
fn test_sleeping_work_completes_on_wall_clock() {
    let supervisor = TimeoutSupervisor::wall_clock();
    let work = WorkUnit::new("sleeper", |_cancel| {
        std::thread::sleep(Duration::from_secs(2));
        Ok(0.95)
    });

    match supervisor.run(work, Budget::from_secs_f64(10.0)) {
        SupervisorOutcome::Completed { elapsed, value } => {
            assert_eq!(value, 0.95);
            assert!(elapsed >= Duration::from_millis(1900), "elapsed {:?}", elapsed);
            assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
        }
        other => panic!("expected Completed, got {:?}", other.kind()),
    }
}

#[test]
fn test_panicking_work_fails() {
    let supervisor = TimeoutSupervisor::wall_clock();
    let work: WorkUnit<()> = WorkUnit::new("panicker", |_cancel| panic!("component blew up"));

    let outcome = supervisor.run(work, Budget::from_secs_f64(5.0));
    let error = outcome.error().expect("panic should surface as Failed");
    assert!(format!("{:#}", error).contains("component blew up"));
}
