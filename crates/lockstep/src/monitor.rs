//! The quiescence monitor: the background loop that drives the clock.
//!
//! Once per clock period the monitor takes a census of published worker
//! statuses and picks exactly one action, in priority order:
//!
//! 1. A failure is recorded: cancel the scenario and stop.
//! 2. Someone is runnable: leave them alone, but fail with a timeout if
//!    the clock has not moved for longer than the stall budget.
//! 3. Someone waits for a future beat: advance the clock.
//! 4. Someone is in a timed wait: do nothing this cycle.
//! 5. Otherwise nobody can make progress: count the cycle, and suspect a
//!    deadlock once enough consecutive cycles have been counted.
//!
//! If the clock is frozen, step 3 cannot advance and the cycle is judged by
//! steps 4 and 5 instead, so a frozen and fully blocked scenario is still
//! reported.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Failure;
use crate::scenario::Scenario;

/// What the monitor sees at the start of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Observation {
    pub(crate) failure_recorded: bool,
    pub(crate) any_runnable: bool,
    pub(crate) anyone_waiting_for_a_future_beat: bool,
    pub(crate) clock_frozen: bool,
    pub(crate) any_timed_waiting: bool,
}

/// The single action taken in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Abort,
    CheckTimeout,
    Advance,
    Idle,
    SuspectDeadlock,
}

pub(crate) fn decide(observation: Observation) -> Decision {
    if observation.failure_recorded {
        Decision::Abort
    } else if observation.any_runnable {
        Decision::CheckTimeout
    } else if observation.anyone_waiting_for_a_future_beat && !observation.clock_frozen {
        Decision::Advance
    } else if observation.any_timed_waiting {
        Decision::Idle
    } else {
        Decision::SuspectDeadlock
    }
}

#[derive(Debug)]
pub(crate) struct QuiescenceMonitor {
    scenario: Arc<Scenario>,
    period: Duration,
    timeout: Duration,
    deadlock_threshold: u32,
    deadlock_count: u32,
    last_progress: Instant,
}

impl QuiescenceMonitor {
    pub(crate) fn new(
        scenario: Arc<Scenario>,
        period: Duration,
        timeout: Duration,
        deadlock_threshold: u32,
    ) -> Self {
        Self {
            scenario,
            period,
            timeout,
            deadlock_threshold,
            deadlock_count: 0,
            last_progress: Instant::now(),
        }
    }

    /// Runs until every worker has terminated or the scenario is aborted.
    pub(crate) fn run(mut self) {
        loop {
            let census = self.scenario.registry.census();
            if census.alive == 0 {
                break;
            }

            let observation = Observation {
                failure_recorded: !self.scenario.failures.is_empty(),
                any_runnable: census.runnable > 0,
                anyone_waiting_for_a_future_beat: self
                    .scenario
                    .clock
                    .is_anyone_waiting_for_a_future_beat(),
                clock_frozen: self.scenario.clock.is_frozen(),
                any_timed_waiting: census.timed_waiting > 0,
            };

            if !self.step(decide(observation)) {
                break;
            }
            thread::sleep(self.period);
        }
        tracing::trace!(beat = self.scenario.clock.current_beat(), "monitor stopped");
    }

    /// Applies `decision`. Returns false once the monitor should stop.
    fn step(&mut self, decision: Decision) -> bool {
        match decision {
            Decision::Abort => {
                self.scenario.cancel();
                return false;
            }
            Decision::CheckTimeout => {
                self.deadlock_count = 0;
                if self.last_progress.elapsed() > self.timeout {
                    tracing::warn!(timeout = ?self.timeout, "no clock progress before timeout");
                    self.scenario.fail(Failure::Timeout {
                        timeout: self.timeout,
                    });
                }
            }
            Decision::Advance => {
                // A freeze taken since the observation leaves the clock
                // untouched; the next cycle looks again.
                if let Some(beat) = self.scenario.clock.advance() {
                    tracing::debug!(beat, "clock advanced");
                    self.deadlock_count = 0;
                    self.last_progress = Instant::now();
                }
            }
            Decision::Idle => {}
            Decision::SuspectDeadlock => self.suspect_deadlock(),
        }
        true
    }

    fn suspect_deadlock(&mut self) {
        if self.deadlock_count >= self.deadlock_threshold {
            let waited = self.period * self.deadlock_threshold;
            tracing::warn!(
                cycles = self.deadlock_threshold,
                ?waited,
                "every live worker is blocked with nobody waiting for a beat"
            );
            self.scenario.fail(Failure::DeadlockSuspected {
                cycles: self.deadlock_threshold,
                waited,
            });
        } else {
            self.deadlock_count += 1;
        }
    }
}
