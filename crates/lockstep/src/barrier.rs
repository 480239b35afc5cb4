//! Start barrier: holds every registered worker until the orchestrator
//! releases them together.
//!
//! The registering thread increments the starting count before spawning a
//! worker; the worker decrements it as soon as its thread runs and then
//! parks on the gate. `conduct` waits for the count to reach zero (every
//! worker is parked) and opens the gate once, so beat 0 only begins when
//! every participant is ready. Workers registered after the gate opened
//! pass straight through.

use std::sync::{Condvar, Mutex, PoisonError};

use crate::sync::lock;

/// How a worker left the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Go,
    /// The scenario was abandoned before (or while) the worker was parked.
    Aborted,
}

#[derive(Debug, Default)]
struct BarrierState {
    starting: usize,
    open: bool,
    aborted: bool,
}

#[derive(Debug, Default)]
pub(crate) struct StartBarrier {
    state: Mutex<BarrierState>,
    changed: Condvar,
}

impl StartBarrier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Called by the registering thread before the worker thread exists.
    pub(crate) fn worker_created(&self) {
        lock(&self.state).starting += 1;
    }

    /// Called by the worker thread the moment it starts.
    pub(crate) fn worker_arrived(&self) {
        let mut state = lock(&self.state);
        state.starting -= 1;
        self.changed.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn starting(&self) -> usize {
        lock(&self.state).starting
    }

    /// Blocks until every created worker has arrived.
    pub(crate) fn wait_until_all_arrived(&self) {
        let state = lock(&self.state);
        let _state = self
            .changed
            .wait_while(state, |s| s.starting != 0 && !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Opens the gate for every parked and future worker.
    pub(crate) fn release(&self) {
        let mut state = lock(&self.state);
        state.open = true;
        self.changed.notify_all();
    }

    /// Opens the gate with an abort marker; parked workers skip their body.
    pub(crate) fn abort(&self) {
        let mut state = lock(&self.state);
        state.aborted = true;
        self.changed.notify_all();
    }

    /// Parks the calling worker until the gate opens or the scenario is
    /// aborted.
    pub(crate) fn wait_for_release(&self) -> Release {
        let state = lock(&self.state);
        let state = self
            .changed
            .wait_while(state, |s| !s.open && !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);
        if state.aborted {
            Release::Aborted
        } else {
            Release::Go
        }
    }
}
