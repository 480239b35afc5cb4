//! The orchestrator facade.
//!
//! A [`Conductor`] has a three-phase lifecycle. In *setup* workers are
//! registered; each gets its own thread, which parks at the start gate.
//! [`Conductor::conduct`] moves to *running*: it waits until every worker is
//! parked, opens the gate, starts the quiescence monitor and joins the
//! workers in registration order. Once they are done the conductor is
//! *finished* and cannot be reused.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::ConductorConfig;
use crate::error::{ConductorError, UsageError};
use crate::monitor::QuiescenceMonitor;
use crate::registry::WorkerHandle;
use crate::scenario::{Phase, Scenario};
use crate::worker::Worker;

const MONITOR_THREAD_NAME: &str = "conductor-clock";

#[derive(Debug)]
pub struct Conductor {
    scenario: Arc<Scenario>,
    config: ConductorConfig,
    /// The thread that created the conductor; the only one allowed to
    /// conduct.
    owner: ThreadId,
}

impl Conductor {
    /// Creates a conductor with the built-in defaults (10 ms clock period,
    /// 5 s timeout).
    pub fn new() -> Self {
        Self::with_config(ConductorConfig::default())
    }

    pub fn with_config(config: ConductorConfig) -> Self {
        Self {
            scenario: Arc::new(Scenario::new()),
            config,
            owner: thread::current().id(),
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Registers a named worker and starts its thread.
    ///
    /// The body does not run until `conduct` opens the start gate (or right
    /// away, if the gate is already open).
    ///
    /// # Errors
    ///
    /// - `ConductorError::DuplicateName` if `name` is taken
    /// - `UsageError::RegisterAfterFinished` once the conductor is finished
    /// - `ConductorError::Spawn` if the OS refuses a new thread
    pub fn register<F>(&self, name: impl Into<String>, body: F) -> Result<WorkerHandle, ConductorError>
    where
        F: FnOnce(&Worker) -> anyhow::Result<()> + Send + 'static,
    {
        self.scenario.register(Some(name.into()), Box::new(body))
    }

    /// Registers a worker named `Conductor-Thread-N`, where N is the number of
    /// workers registered before it.
    pub fn register_unnamed<F>(&self, body: F) -> Result<WorkerHandle, ConductorError>
    where
        F: FnOnce(&Worker) -> anyhow::Result<()> + Send + 'static,
    {
        self.scenario.register(None, Box::new(body))
    }

    pub fn get_worker(&self, name: &str) -> Option<WorkerHandle> {
        self.scenario.registry.get(name)
    }

    pub fn beat(&self) -> u64 {
        self.scenario.clock.current_beat()
    }

    pub fn with_frozen<R>(&self, f: impl FnOnce() -> R) -> Result<R, ConductorError> {
        self.scenario
            .clock
            .with_frozen(f)
            .ok_or(ConductorError::Cancelled)
    }

    pub fn is_frozen(&self) -> bool {
        self.scenario.clock.is_frozen()
    }

    /// True once `conduct` has been called.
    pub fn conducting_has_begun(&self) -> bool {
        self.scenario.phase() != Phase::Setup
    }

    pub fn is_finished(&self) -> bool {
        self.scenario.phase() == Phase::Finished
    }

    /// Conducts the scenario with the configured clock period and timeout.
    pub fn conduct(&self) -> Result<(), ConductorError> {
        self.conduct_with(self.config.clock_period(), self.config.timeout())
    }

    /// Conducts the scenario and blocks until every worker has stopped.
    ///
    /// Returns the scenario's first failure, if any: a worker error or
    /// panic, a timeout, or a suspected deadlock.
    ///
    /// # Errors
    ///
    /// - `UsageError` if either duration or the configured deadlock threshold
    ///   is zero, `conduct` was already called, or the caller is not the
    ///   thread that created the conductor
    /// - `ConductorError::Failed` with the recorded failure
    pub fn conduct_with(&self, clock_period: Duration, timeout: Duration) -> Result<(), ConductorError> {
        self.ensure_owner("conduct")?;
        if clock_period.is_zero() {
            return Err(UsageError::NonPositiveClockPeriod.into());
        }
        if timeout.is_zero() {
            return Err(UsageError::NonPositiveTimeout.into());
        }
        if self.config.deadlock_threshold == 0 {
            return Err(UsageError::ZeroDeadlockThreshold.into());
        }
        if !self.scenario.transition(Phase::Setup, Phase::Running) {
            return Err(UsageError::ConductTwice.into());
        }

        let scenario = &self.scenario;
        scenario.barrier.wait_until_all_arrived();
        scenario.barrier.release();
        tracing::info!(
            workers = scenario.registry.len(),
            ?clock_period,
            ?timeout,
            "conducting scenario"
        );

        let monitor = QuiescenceMonitor::new(
            Arc::clone(scenario),
            clock_period,
            timeout,
            self.config.deadlock_threshold,
        );
        let monitor = match thread::Builder::new()
            .name(MONITOR_THREAD_NAME.to_string())
            .spawn(move || monitor.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                // The gate is already open; released workers must not outlive
                // this call.
                self.abandon();
                return Err(ConductorError::Spawn {
                    name: MONITOR_THREAD_NAME.to_string(),
                    source,
                });
            }
        };

        self.join_workers();
        if monitor.join().is_err() {
            tracing::error!("quiescence monitor panicked");
        }
        scenario.transition(Phase::Running, Phase::Finished);

        let beat = scenario.clock.current_beat();
        match scenario.failures.peek() {
            Some(failure) => {
                tracing::info!(beat, %failure, "scenario failed");
                Err(failure.clone().into())
            }
            None => {
                tracing::info!(beat, "scenario finished");
                Ok(())
            }
        }
    }

    /// Conducts the scenario, then runs `f` if it succeeded.
    ///
    /// Only the creating thread may call this, and only before conducting.
    pub fn when_finished<R>(&self, f: impl FnOnce() -> R) -> Result<R, ConductorError> {
        self.ensure_owner("when_finished")?;
        if self.conducting_has_begun() {
            return Err(UsageError::WhenFinishedAfterConduct.into());
        }
        self.conduct()?;
        Ok(f())
    }

    pub fn wait_till_finished(&self) -> Result<(), ConductorError> {
        self.when_finished(|| ())
    }

    fn ensure_owner(&self, operation: &'static str) -> Result<(), UsageError> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(UsageError::NotOrchestratorThread { operation })
        }
    }

    /// Joins workers in registration order, including any registered while
    /// the scenario runs. Stops early when a failure is recorded.
    fn join_workers(&self) {
        let scenario = &self.scenario;
        let mut next = 0;
        while let Some(worker) = scenario.registry.entry(next) {
            scenario.wake.wait_until(
                || worker.is_terminated() || !scenario.failures.is_empty(),
                None,
            );
            if !scenario.failures.is_empty() {
                self.stop_workers();
                return;
            }
            worker.join();
            next += 1;
        }
    }

    /// Stops a released scenario that can no longer be conducted.
    fn abandon(&self) {
        self.stop_workers();
        self.scenario.transition(Phase::Running, Phase::Finished);
    }

    /// Cancels the scenario and gives workers `cancel_grace` to unwind.
    /// Workers that are still running afterwards are detached.
    fn stop_workers(&self) {
        let scenario = &self.scenario;
        scenario.cancel();

        let deadline = Instant::now() + self.config.cancel_grace();
        scenario
            .wake
            .wait_until(|| scenario.registry.all_terminated(), Some(deadline));

        for worker in scenario.registry.snapshot() {
            if worker.is_terminated() {
                worker.join();
            } else if worker.detach() {
                tracing::warn!(
                    worker = %worker.name,
                    status = ?worker.status(),
                    grace = ?self.config.cancel_grace(),
                    "worker ignored cancellation; detaching its thread"
                );
            }
        }
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Conductor {
    /// Workers of a conductor that never finished are still parked at the
    /// gate (or running); cancel so that their threads exit.
    fn drop(&mut self) {
        if self.scenario.phase() != Phase::Finished {
            self.scenario.cancel();
        }
    }
}
