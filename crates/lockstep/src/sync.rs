//! Small synchronization helpers shared by the engine.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Engine state is never left half-updated across a panic (user code runs
/// outside engine locks), so poisoning carries no information here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wake-up channel for the orchestrator thread.
///
/// Stands in for interrupting a thread blocked in `join`: workers notify on
/// termination and the monitor notifies when it records a failure. The
/// generation counter lives under the mutex, so a notification between the
/// waiter's predicate check and its wait cannot be lost.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Blocks until `ready` holds or `deadline` passes. Returns the final
    /// value of `ready`.
    ///
    /// `ready` must not touch this signal.
    pub(crate) fn wait_until(&self, mut ready: impl FnMut() -> bool, deadline: Option<Instant>) -> bool {
        let mut generation = lock(&self.generation);
        loop {
            if ready() {
                return true;
            }
            match deadline {
                None => {
                    generation = self
                        .changed
                        .wait(generation)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return ready();
                    }
                    generation = self
                        .changed
                        .wait_timeout(generation, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
