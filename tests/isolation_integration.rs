//! Integration tests for the process isolation boundary
//!
//! Each test spawns the real `evalbox-wrapper` binary.

use evalbox::config::config::EvalboxConfig;
use evalbox::config::types::{EvalError, MemoryLimit, WORST_SCORE};
use evalbox::exec::boundary::{evaluate_candidate, ExperimentSpec, IsolationBoundary};
use evalbox::kernel::signal;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// The kill test tears down every tracked child, so children must not overlap
static SERIAL: Mutex<()> = Mutex::new(());

fn experiment(dataset: &str, timeout_secs: f64) -> ExperimentSpec {
    let mut config = EvalboxConfig::default();
    config.isolation.wrapper_executable = Some(PathBuf::from(env!("CARGO_BIN_EXE_evalbox-wrapper")));
    ExperimentSpec::from_config(&config, dataset, timeout_secs).unwrap()
}

fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_same_candidate_scores_identically() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let experiment = experiment("type=dummy:size=80:seed={SEED}", 10.0);
    let boundary = IsolationBoundary::default();
    let candidate = args(&["-targetclass", "nearest-centroid"]);

    let first = evaluate_candidate(&boundary, &experiment, &candidate, "11").unwrap();
    let second = evaluate_candidate(&boundary, &experiment, &candidate, "11").unwrap();

    assert_eq!(first.score, second.score);
    assert!(first.score < WORST_SCORE);
    assert!(first.time >= 0.0);
    let detail = first.detail.expect("wrapper prints a detail line");
    assert!(detail.completed);
}

#[test]
fn test_heap_ceiling_reports_memory_exhaustion() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut experiment = experiment("type=dummy:size=20", 20.0);
    experiment.memory_limit = MemoryLimit::parse("64m").unwrap();

    let outcome = evaluate_candidate(
        &IsolationBoundary::default(),
        &experiment,
        &args(&["-targetclass", "testing.hog", "-M", "8"]),
        "1",
    )
    .unwrap();

    assert_eq!(outcome.score, WORST_SCORE);
    let detail = outcome.detail.expect("wrapper prints a detail line");
    assert!(detail.memory_exhausted);
    assert!(!detail.completed);
}

#[test]
fn test_killed_child_is_an_isolation_failure() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let experiment = experiment("type=dummy:size=20", 60.0);

    let killer = std::thread::spawn(|| {
        // Wait for the child to register, then tear it down from outside
        for _ in 0..200 {
            if signal::tracked_children() > 0 {
                std::thread::sleep(Duration::from_millis(200));
                return signal::kill_tracked_children();
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        0
    });

    let err = evaluate_candidate(
        &IsolationBoundary::default(),
        &experiment,
        &args(&["-targetclass", "testing.sleep", "-S", "30"]),
        "1",
    )
    .unwrap_err();

    assert_eq!(killer.join().unwrap(), 1);
    match err {
        EvalError::ProcessIsolation(reason) => assert!(reason.contains("no result line"), "{}", reason),
        other => panic!("expected ProcessIsolation, got {}", other),
    }
}

#[test]
fn test_missing_wrapper_fails_to_spawn() {
    let mut experiment = experiment("type=dummy", 1.0);
    experiment.wrapper_executable = PathBuf::from("/nonexistent/evalbox-wrapper");

    let err = evaluate_candidate(
        &IsolationBoundary::default(),
        &experiment,
        &args(&["-targetclass", "majority"]),
        "1",
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::ProcessIsolation(_)));
}
