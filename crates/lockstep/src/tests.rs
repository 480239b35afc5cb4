//! Unit tests for the conductor lifecycle.
//!
//! End-to-end interleaving scenarios live in `tests/`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use test_case::test_case;

use crate::{Conductor, ConductorConfig, ConductorError, FailureKind, UsageError, WorkerStatus};

// ============================================================================
// Test Helpers
// ============================================================================

fn usage(result: Result<(), ConductorError>) -> UsageError {
    match result {
        Err(ConductorError::Usage(e)) => e,
        other => panic!("expected a usage error, got {other:?}"),
    }
}

fn wait_for_status(handle: &crate::WorkerHandle, status: WorkerStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.status() != status {
        assert!(Instant::now() < deadline, "worker never reached {status:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Usage Errors
// ============================================================================

#[test_case(Duration::ZERO, Duration::from_secs(1), UsageError::NonPositiveClockPeriod; "zero clock period")]
#[test_case(Duration::from_millis(10), Duration::ZERO, UsageError::NonPositiveTimeout; "zero timeout")]
fn conduct_rejects_non_positive_durations(period: Duration, timeout: Duration, expected: UsageError) {
    let conductor = Conductor::new();
    assert_eq!(usage(conductor.conduct_with(period, timeout)), expected);
    assert!(!conductor.conducting_has_begun());
}

#[test]
fn conduct_rejects_zero_deadlock_threshold() {
    let config = ConductorConfig::default().with_deadlock_threshold(0);
    let conductor = Conductor::with_config(config);
    conductor
        .register("brief", |w| {
            w.blocking(|| thread::sleep(Duration::from_millis(50)));
            Ok(())
        })
        .unwrap();

    assert_eq!(usage(conductor.conduct()), UsageError::ZeroDeadlockThreshold);
    assert!(!conductor.conducting_has_begun());
}

#[test]
fn conduct_cannot_be_called_twice() {
    let conductor = Conductor::new();
    conductor.conduct().expect("empty scenario succeeds");

    assert_eq!(usage(conductor.conduct()), UsageError::ConductTwice);
}

#[test]
fn when_finished_after_conduct_is_rejected() {
    let conductor = Conductor::new();
    conductor.conduct().unwrap();

    assert_eq!(
        usage(conductor.when_finished(|| ())),
        UsageError::WhenFinishedAfterConduct
    );
}

#[test]
fn only_the_creating_thread_may_conduct() {
    let conductor = Conductor::new();

    let (conduct, when_finished) = thread::scope(|s| {
        s.spawn(|| (conductor.conduct(), conductor.wait_till_finished()))
            .join()
            .unwrap()
    });

    assert_eq!(
        usage(conduct),
        UsageError::NotOrchestratorThread {
            operation: "conduct"
        }
    );
    assert_eq!(
        usage(when_finished),
        UsageError::NotOrchestratorThread {
            operation: "when_finished"
        }
    );
    assert!(!conductor.conducting_has_begun());
}

#[test]
fn register_after_finished_is_rejected() {
    let conductor = Conductor::new();
    conductor.register("early", |_| Ok(())).unwrap();
    conductor.conduct().unwrap();
    assert!(conductor.is_finished());

    let err = conductor.register("late", |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        ConductorError::Usage(UsageError::RegisterAfterFinished)
    ));
    assert_eq!(err.to_string(), "registerAfterFinished");
}

#[test]
fn duplicate_names_are_rejected() {
    let conductor = Conductor::new();
    conductor.register("twin", |_| Ok(())).unwrap();

    let err = conductor.register("twin", |_| Ok(())).unwrap_err();
    assert!(matches!(err, ConductorError::DuplicateName { ref name } if name == "twin"));
    assert!(conductor.get_worker("nobody").is_none());

    conductor.conduct().unwrap();
}

#[test]
fn waiting_for_beat_zero_fails_the_worker() {
    let conductor = Conductor::new();
    conductor
        .register("eager", |w| {
            w.wait_for_beat(0)?;
            Ok(())
        })
        .unwrap();

    let err = conductor.conduct().unwrap_err();
    let failure = err.failure().expect("worker failure");
    assert_eq!(failure.kind(), FailureKind::WorkerFailure);
    assert_eq!(failure.worker(), Some("eager"));
    assert!(failure.to_string().contains("cannot wait for beat zero"));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn scenario_without_workers_finishes_at_beat_zero() {
    let conductor = Conductor::new();
    assert!(!conductor.conducting_has_begun());

    conductor.wait_till_finished().unwrap();

    assert!(conductor.conducting_has_begun());
    assert!(conductor.is_finished());
    assert_eq!(conductor.beat(), 0);
}

#[test]
fn unnamed_workers_get_sequential_names() {
    let conductor = Conductor::new();
    let first = conductor.register_unnamed(|_| Ok(())).unwrap();
    conductor.register("named", |_| Ok(())).unwrap();
    let third = conductor.register_unnamed(|_| Ok(())).unwrap();

    assert_eq!(first.name(), "Conductor-Thread-0");
    assert_eq!(third.name(), "Conductor-Thread-2");
    assert_eq!(third.thread().name(), Some("Conductor-Thread-2"));
    conductor.conduct().unwrap();
}

#[test]
fn bodies_wait_for_conduct() {
    let conductor = Conductor::new();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let handle = conductor
        .register("gated", move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    thread::sleep(Duration::from_millis(30));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(handle.status(), WorkerStatus::NotStarted);

    conductor.conduct().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(handle.status(), WorkerStatus::Terminated);
}

#[test]
fn when_finished_runs_only_after_success() {
    let ok = Conductor::new();
    ok.register("fine", |_| Ok(())).unwrap();
    assert_eq!(ok.when_finished(|| 7).unwrap(), 7);

    let failing = Conductor::new();
    failing
        .register("broken", |_| anyhow::bail!("subject misbehaved"))
        .unwrap();
    let mut ran = false;
    let result = failing.when_finished(|| ran = true);

    assert!(result.is_err());
    assert!(!ran);
}

#[test]
fn worker_panic_is_reported_as_worker_failure() {
    let conductor = Conductor::new();
    conductor
        .register("panicky", |_| panic!("assertion inside worker"))
        .unwrap();

    let err = conductor.conduct().unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.kind(), FailureKind::WorkerFailure);
    assert!(failure.to_string().contains("assertion inside worker"));
}

#[test]
fn first_failure_wins_and_siblings_are_cancelled() {
    let conductor = Conductor::new();
    conductor
        .register("failing", |w| {
            w.wait_for_beat(1)?;
            anyhow::bail!("first")
        })
        .unwrap();
    conductor
        .register("waiting", |w| {
            w.wait_for_beat(1_000)?;
            anyhow::bail!("never reached")
        })
        .unwrap();

    let err = conductor.conduct().unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.worker(), Some("failing"));
    assert!(conductor.beat() < 1_000);
}

#[test]
fn nested_workers_run_and_are_joined() {
    let conductor = Conductor::new();
    let runs = Arc::new(AtomicUsize::new(0));

    let outer_runs = Arc::clone(&runs);
    conductor
        .register("outer", move |w| {
            let inner_runs = Arc::clone(&outer_runs);
            w.register("inner", move |inner| {
                inner.wait_for_beat(1)?;
                inner_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?;
            outer_runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    conductor.conduct().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(conductor.beat(), 1);
}

#[test]
fn dropping_an_unconducted_conductor_releases_its_workers() {
    let ran = Arc::new(AtomicBool::new(false));
    let handle = {
        let conductor = Conductor::new();
        let flag = Arc::clone(&ran);
        conductor
            .register("abandoned", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
    };

    wait_for_status(&handle, WorkerStatus::Terminated);
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn orchestrator_can_freeze_before_conducting() {
    let conductor = Conductor::new();
    let frozen = conductor.with_frozen(|| conductor.is_frozen()).unwrap();

    assert!(frozen);
    assert!(!conductor.is_frozen());
}
