//! State shared by the orchestrator, the monitor and every worker thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use crate::barrier::{Release, StartBarrier};
use crate::clock::LogicalClock;
use crate::error::{ConductorError, Failure, UsageError};
use crate::failure::FailureChannel;
use crate::registry::{WorkerEntry, WorkerHandle, WorkerRegistry};
use crate::status::WorkerStatus;
use crate::sync::Signal;
use crate::worker::Worker;

/// A worker body. Receives the worker's own context.
pub(crate) type Body = Box<dyn FnOnce(&Worker) -> anyhow::Result<()> + Send + 'static>;

/// Lifecycle phase. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum Phase {
    Setup = 0,
    Running = 1,
    Finished = 2,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Setup,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Scenario {
    pub(crate) clock: LogicalClock,
    pub(crate) barrier: StartBarrier,
    pub(crate) failures: FailureChannel,
    pub(crate) registry: WorkerRegistry,
    /// Wakes the orchestrator when a worker terminates or a failure lands.
    pub(crate) wake: Signal,
    phase: AtomicU8,
    cancelled: AtomicBool,
}

impl Scenario {
    pub(crate) fn new() -> Self {
        Self {
            clock: LogicalClock::new(),
            barrier: StartBarrier::new(),
            failures: FailureChannel::new(),
            registry: WorkerRegistry::new(),
            wake: Signal::default(),
            phase: AtomicU8::new(Phase::Setup as u8),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Moves from `from` to `to`. Returns false if the phase was not `from`.
    pub(crate) fn transition(&self, from: Phase, to: Phase) -> bool {
        debug_assert!(from < to);
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Records `failure` (if it is the first) and wakes the orchestrator.
    pub(crate) fn fail(&self, failure: Failure) {
        self.failures.offer(failure);
        self.wake.notify();
    }

    /// Asks every worker to stop: beat waits, freezes, the start gate and
    /// instrumented blocking points all return `Cancelled` from now on.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clock.cancel();
        self.barrier.abort();
        for worker in self.registry.snapshot() {
            worker.thread.unpark();
        }
        self.wake.notify();
    }

    /// Registers a worker and starts its thread. The thread parks at the
    /// start gate until the scenario is released.
    pub(crate) fn register(
        self: &Arc<Self>,
        name: Option<String>,
        body: Body,
    ) -> Result<WorkerHandle, ConductorError> {
        if self.phase() == Phase::Finished {
            return Err(UsageError::RegisterAfterFinished.into());
        }

        let (publish, published) = mpsc::sync_channel::<Arc<WorkerEntry>>(1);
        let scenario = Arc::clone(self);

        self.barrier.worker_created();
        let entry = match self.registry.register(name, move |name| {
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run_worker(&scenario, &published, body))
        }) {
            Ok(entry) => entry,
            Err(e) => {
                // No thread will ever arrive for this reservation.
                self.barrier.worker_arrived();
                return Err(e);
            }
        };

        // The receiving thread is parked on `published` and cannot be gone.
        let _ = publish.send(Arc::clone(&entry));

        tracing::debug!(worker = %entry.name, id = %entry.id, "registered worker");
        Ok(WorkerHandle(entry))
    }
}

/// Entry point of every worker thread.
fn run_worker(scenario: &Arc<Scenario>, published: &mpsc::Receiver<Arc<WorkerEntry>>, body: Body) {
    scenario.barrier.worker_arrived();

    let Ok(entry) = published.recv() else {
        return;
    };

    if scenario.barrier.wait_for_release() == Release::Aborted {
        entry.status.store(WorkerStatus::Terminated);
        scenario.wake.notify();
        return;
    }

    entry.status.store(WorkerStatus::Running);
    let worker = Worker::new(Arc::clone(&entry), Arc::clone(scenario));

    let failure = match panic::catch_unwind(AssertUnwindSafe(|| body(&worker))) {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(Failure::from_body_error(&entry.name, error)),
        Err(payload) => Some(Failure::from_panic(&entry.name, payload.as_ref())),
    };

    if let Some(failure) = failure {
        tracing::debug!(worker = %entry.name, %failure, "worker failed");
        scenario.failures.offer(failure);
    }

    entry.status.store(WorkerStatus::Terminated);
    scenario.wake.notify();
}
