//! The logical beat clock.
//!
//! Beats start at 0 and only move forward, one at a time, when the
//! quiescence monitor calls [`LogicalClock::advance`]. Workers block in
//! [`LogicalClock::wait_for_beat`] until the beat they asked for arrives.
//!
//! # Freezing
//!
//! A freeze is a shared hold on the clock: any number of workers may hold
//! one at the same time, and `advance` is a no-op while `freeze_count > 0`.
//! Because freeze acquisition, release and `advance` all run under the same
//! mutex, an advance can never be half-done when a freeze is acquired, and
//! `current_beat` always returns a coherent value.
//!
//! # Wake publication
//!
//! Waiters are tracked together with their status cell. `advance` flips
//! every waiter whose target is reached back to `Running` before releasing
//! the lock, so the monitor never sees a released worker as quiescent while
//! it is still waiting to be scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::status::{StatusCell, WorkerStatus};
use crate::sync::lock;

/// How often a beat waiter rechecks its interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(5);

/// Result of waiting for a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeatWait {
    Reached,
    Cancelled,
    Interrupted,
}

#[derive(Debug)]
struct Waiter {
    target: u64,
    status: Arc<StatusCell>,
}

#[derive(Debug, Default)]
struct ClockState {
    current: u64,
    highest_requested: u64,
    freeze_count: usize,
    cancelled: bool,
    waiters: Vec<Waiter>,
}

#[derive(Debug, Default)]
pub(crate) struct LogicalClock {
    state: Mutex<ClockState>,
    tick: Condvar,
}

impl LogicalClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current_beat(&self) -> u64 {
        lock(&self.state).current
    }

    pub(crate) fn is_frozen(&self) -> bool {
        lock(&self.state).freeze_count > 0
    }

    /// True iff some worker asked for a beat that has not arrived yet.
    pub(crate) fn is_anyone_waiting_for_a_future_beat(&self) -> bool {
        let state = lock(&self.state);
        state.highest_requested > state.current
    }

    /// Advances the clock by exactly one beat and wakes every waiter.
    ///
    /// Returns the new beat, or `None` if the clock is frozen (in which
    /// case nothing changes).
    pub(crate) fn advance(&self) -> Option<u64> {
        let mut state = lock(&self.state);
        if state.freeze_count > 0 {
            return None;
        }

        state.current += 1;
        let beat = state.current;
        state.waiters.retain(|waiter| {
            if waiter.target <= beat {
                waiter.status.store(WorkerStatus::Running);
                false
            } else {
                true
            }
        });
        self.tick.notify_all();
        Some(beat)
    }

    /// Blocks until the clock reaches `beat`, the scenario is cancelled, or
    /// `interrupted` is raised.
    ///
    /// `beat` must be positive; the caller validates it.
    pub(crate) fn wait_for_beat(
        &self,
        beat: u64,
        status: &Arc<StatusCell>,
        interrupted: &AtomicBool,
    ) -> BeatWait {
        debug_assert!(beat > 0, "beat zero is rejected before reaching the clock");

        let mut state = lock(&self.state);
        if beat > state.highest_requested {
            state.highest_requested = beat;
        }
        if state.current >= beat {
            return BeatWait::Reached;
        }
        if state.cancelled {
            return BeatWait::Cancelled;
        }

        let previous = status.load();
        status.store(WorkerStatus::WaitingForBeat);
        state.waiters.push(Waiter {
            target: beat,
            status: Arc::clone(status),
        });

        loop {
            if state.current >= beat {
                // advance() already removed us and published Running.
                return BeatWait::Reached;
            }

            let outcome = if state.cancelled {
                Some(BeatWait::Cancelled)
            } else if interrupted.swap(false, Ordering::SeqCst) {
                Some(BeatWait::Interrupted)
            } else {
                None
            };
            if let Some(outcome) = outcome {
                state.waiters.retain(|w| !Arc::ptr_eq(&w.status, status));
                status.store(previous);
                return outcome;
            }

            state = self
                .tick
                .wait_timeout(state, INTERRUPT_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Takes a shared freeze hold. Returns `None` if the scenario has been
    /// cancelled.
    pub(crate) fn freeze(&self) -> Option<FreezeGuard<'_>> {
        let mut state = lock(&self.state);
        if state.cancelled {
            return None;
        }
        state.freeze_count += 1;
        Some(FreezeGuard { clock: self })
    }

    /// Runs `f` with the clock frozen.
    pub(crate) fn with_frozen<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _hold = self.freeze()?;
        Some(f())
    }

    /// Wakes every waiter and makes further waits and freezes fail.
    pub(crate) fn cancel(&self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        self.tick.notify_all();
    }
}

/// Releases a freeze hold when dropped.
pub(crate) struct FreezeGuard<'a> {
    clock: &'a LogicalClock,
}

impl Drop for FreezeGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.clock.state);
        state.freeze_count -= 1;
    }
}
