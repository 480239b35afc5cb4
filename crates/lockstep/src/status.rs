//! Published worker status.
//!
//! The runtime gives no portable way to ask whether a thread is runnable or
//! parked, so each worker publishes its own status at every blocking point
//! and the quiescence monitor reads the published value.

use std::sync::atomic::{AtomicU8, Ordering};

/// Observable state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerStatus {
    /// Registered, not yet released or not yet scheduled.
    NotStarted = 0,
    Running = 1,
    /// Blocked on a lock, condition variable or foreign blocking call.
    Blocked = 2,
    WaitingForBeat = 3,
    /// Sleeping or in a wait with a deadline.
    TimedWaiting = 4,
    Terminated = 5,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::WaitingForBeat,
            4 => Self::TimedWaiting,
            _ => Self::Terminated,
        }
    }

    pub fn is_alive(self) -> bool {
        self != Self::Terminated
    }

    /// Runnable workers block clock advancement. A worker that was released
    /// but has not been scheduled yet counts as runnable.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::NotStarted | Self::Running)
    }
}

/// Atomic cell holding a [`WorkerStatus`].
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(WorkerStatus::NotStarted as u8))
    }

    pub(crate) fn load(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self, status: WorkerStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }

    fn swap(&self, status: WorkerStatus) -> WorkerStatus {
        WorkerStatus::from_u8(self.0.swap(status as u8, Ordering::SeqCst))
    }

    /// Publishes `status` until the returned guard drops, then restores the
    /// previous value (also on unwind).
    pub(crate) fn enter(&self, status: WorkerStatus) -> StatusGuard<'_> {
        let previous = self.swap(status);
        StatusGuard {
            cell: self,
            previous,
        }
    }
}

pub(crate) struct StatusGuard<'a> {
    cell: &'a StatusCell,
    previous: WorkerStatus,
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.cell.store(self.previous);
    }
}
