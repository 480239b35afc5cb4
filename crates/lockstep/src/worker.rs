//! The context handed to every worker body.
//!
//! A [`Worker`] is how a body reaches its scenario: the beat clock, its
//! sibling workers, and nested registration. It also provides the
//! instrumented blocking points. The quiescence monitor cannot see inside
//! the OS scheduler, so a body that blocks on a lock, condition variable or
//! sleep should do it through these methods; each publishes the matching
//! [`WorkerStatus`] for as long as it blocks and restores the previous one on
//! the way out, including on unwind.
//!
//! Every blocking point is also a cancellation point. Once the scenario
//! has failed, they return [`ConductorError::Cancelled`] so the body can
//! unwind with `?`.
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use lockstep::Conductor;
//!
//! let conductor = Conductor::new();
//! let shared = Arc::new(Mutex::new(0));
//!
//! let counter = Arc::clone(&shared);
//! conductor.register("incrementer", move |w| {
//!     *w.lock(&counter)? += 1;
//!     Ok(())
//! })?;
//! conductor.conduct()?;
//! # Ok::<(), lockstep::ConductorError>(())
//! ```

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::BeatWait;
use crate::error::{ConductorError, UsageError};
use crate::registry::{WorkerEntry, WorkerHandle, WorkerId};
use crate::scenario::Scenario;
use crate::status::WorkerStatus;

/// Delay between attempts to take a contended lock.
const LOCK_POLL: Duration = Duration::from_micros(100);

/// Longest a condition-variable wait goes without rechecking cancellation.
const CONDVAR_POLL: Duration = Duration::from_millis(10);

/// Per-worker view of a running scenario.
#[derive(Debug)]
pub struct Worker {
    entry: Arc<WorkerEntry>,
    scenario: Arc<Scenario>,
}

impl Worker {
    pub(crate) fn new(entry: Arc<WorkerEntry>, scenario: Arc<Scenario>) -> Self {
        Self { entry, scenario }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn id(&self) -> WorkerId {
        self.entry.id
    }

    /// This worker's stable handle, equal to the one `get_worker` returns.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle(Arc::clone(&self.entry))
    }

    /// The current logical beat.
    pub fn beat(&self) -> u64 {
        self.scenario.clock.current_beat()
    }

    /// Blocks until the clock reaches `beat`.
    ///
    /// Returns immediately if the beat has already been reached.
    ///
    /// # Errors
    ///
    /// - `UsageError::WaitForBeatZero` if `beat` is 0
    /// - `ConductorError::Cancelled` if the scenario is torn down first
    /// - `ConductorError::Interrupted` if another thread interrupts this worker
    pub fn wait_for_beat(&self, beat: u64) -> Result<(), ConductorError> {
        if beat == 0 {
            return Err(UsageError::WaitForBeatZero.into());
        }
        match self
            .scenario
            .clock
            .wait_for_beat(beat, &self.entry.status, &self.entry.interrupted)
        {
            BeatWait::Reached => Ok(()),
            BeatWait::Cancelled => Err(ConductorError::Cancelled),
            BeatWait::Interrupted => Err(self.interrupted_error()),
        }
    }

    /// Runs `f` with the clock frozen: no beat can pass until `f` returns,
    /// even if every worker becomes quiescent meanwhile.
    pub fn with_frozen<R>(&self, f: impl FnOnce() -> R) -> Result<R, ConductorError> {
        self.scenario
            .clock
            .with_frozen(f)
            .ok_or(ConductorError::Cancelled)
    }

    pub fn is_frozen(&self) -> bool {
        self.scenario.clock.is_frozen()
    }

    pub fn get_worker(&self, name: &str) -> Option<WorkerHandle> {
        self.scenario.registry.get(name)
    }

    /// Registers a nested worker. Once the scenario is running it starts
    /// right away.
    pub fn register<F>(&self, name: impl Into<String>, body: F) -> Result<WorkerHandle, ConductorError>
    where
        F: FnOnce(&Worker) -> anyhow::Result<()> + Send + 'static,
    {
        self.scenario.register(Some(name.into()), Box::new(body))
    }

    pub fn register_unnamed<F>(&self, body: F) -> Result<WorkerHandle, ConductorError>
    where
        F: FnOnce(&Worker) -> anyhow::Result<()> + Send + 'static,
    {
        self.scenario.register(None, Box::new(body))
    }

    /// True once the scenario is being torn down.
    pub fn is_cancelled(&self) -> bool {
        self.scenario.is_cancelled()
    }

    /// Reads and clears this worker's interrupt flag.
    pub fn interrupted(&self) -> bool {
        self.entry.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Returns an error if the scenario was cancelled or this worker was
    /// interrupted. Clears the interrupt flag.
    pub fn checkpoint(&self) -> Result<(), ConductorError> {
        if self.scenario.is_cancelled() {
            return Err(ConductorError::Cancelled);
        }
        if self.interrupted() {
            return Err(self.interrupted_error());
        }
        Ok(())
    }

    /// Yields the processor. Spin loops should call this so that they stop
    /// once the scenario is cancelled.
    pub fn yield_now(&self) -> Result<(), ConductorError> {
        self.checkpoint()?;
        thread::yield_now();
        Ok(())
    }

    /// Locks `mutex`, publishing `Blocked` while the lock is contended.
    ///
    /// A poisoned mutex is locked anyway: the panic that poisoned it is
    /// already the scenario's failure.
    pub fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, ConductorError> {
        if let Some(guard) = try_acquire(mutex) {
            return Ok(guard);
        }

        let _blocked = self.entry.status.enter(WorkerStatus::Blocked);
        loop {
            self.checkpoint()?;
            if let Some(guard) = try_acquire(mutex) {
                return Ok(guard);
            }
            thread::park_timeout(LOCK_POLL);
        }
    }

    /// Waits on `condvar` while `condition` holds, publishing `Blocked`.
    pub fn wait_while<'a, T>(
        &self,
        condvar: &Condvar,
        mut guard: MutexGuard<'a, T>,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> Result<MutexGuard<'a, T>, ConductorError> {
        if !condition(&mut guard) {
            return Ok(guard);
        }

        let _blocked = self.entry.status.enter(WorkerStatus::Blocked);
        loop {
            self.checkpoint()?;
            guard = condvar
                .wait_timeout(guard, CONDVAR_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if !condition(&mut guard) {
                return Ok(guard);
            }
        }
    }

    /// Like [`Worker::wait_while`] but gives up after `timeout`, publishing
    /// `TimedWaiting`. The returned flag is true if the wait timed out with
    /// `condition` still holding.
    pub fn wait_timeout_while<'a, T>(
        &self,
        condvar: &Condvar,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> Result<(MutexGuard<'a, T>, bool), ConductorError> {
        if !condition(&mut guard) {
            return Ok((guard, false));
        }

        let deadline = Instant::now() + timeout;
        let _waiting = self.entry.status.enter(WorkerStatus::TimedWaiting);
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok((guard, true));
            }
            guard = condvar
                .wait_timeout(guard, (deadline - now).min(CONDVAR_POLL))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if !condition(&mut guard) {
                return Ok((guard, false));
            }
        }
    }

    /// Sleeps for `duration`, publishing `TimedWaiting`.
    pub fn sleep(&self, duration: Duration) -> Result<(), ConductorError> {
        let deadline = Instant::now() + duration;
        let _sleeping = self.entry.status.enter(WorkerStatus::TimedWaiting);
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            // Interrupts and cancellation unpark us early.
            thread::park_timeout(deadline - now);
        }
    }

    /// Runs a foreign blocking call with this worker published as `Blocked`.
    ///
    /// The call cannot be cancelled; a worker stuck here when the scenario
    /// fails is detached.
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        let _blocked = self.entry.status.enter(WorkerStatus::Blocked);
        f()
    }

    fn interrupted_error(&self) -> ConductorError {
        ConductorError::Interrupted {
            worker: self.entry.name.clone(),
        }
    }
}

fn try_acquire<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}
