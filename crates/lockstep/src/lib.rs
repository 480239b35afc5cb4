//! # lockstep: Deterministic Interleavings for Multi-Threaded Tests
//!
//! Concurrency bugs hide in interleavings that the scheduler rarely picks.
//! `lockstep` lets a test script the interleaving instead, using a logical
//! clock of *beats*:
//!
//! - Each worker runs on its own thread and may call
//!   [`Worker::wait_for_beat`] to block until a given beat.
//! - The beat only advances when every live worker is blocked, and at least
//!   one of them is waiting for a future beat.
//! - A scenario that stalls ends with a failure instead of hanging: a
//!   *timeout* if workers keep running without the clock moving, or a
//!   *suspected deadlock* if every worker stays blocked with nobody waiting
//!   for a beat.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Conductor                   │
//! │        SETUP ──► RUNNING ──► FINISHED        │
//! └───────┬───────────────┬──────────────┬───────┘
//!         │               │              │
//! ┌───────┴──────┐ ┌──────┴──────┐ ┌─────┴───────┐
//! │WorkerRegistry│ │ Quiescence  │ │   Failure   │
//! │ StartBarrier │ │  Monitor    │ │   Channel   │
//! └───────┬──────┘ └──────┬──────┘ └─────────────┘
//!         │               │
//! ┌───────┴───────────────┴──────┐
//! │ LogicalClock (beats, freeze) │
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! A producer fills a one-slot buffer and blocks on the second put; the
//! consumer only starts taking at beat 1, which is guaranteed to come after
//! the producer has blocked.
//!
//! ```no_run
//! use std::collections::VecDeque;
//! use std::sync::{Arc, Condvar, Mutex};
//! use lockstep::Conductor;
//!
//! let slot = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
//! let conductor = Conductor::new();
//!
//! let buf = Arc::clone(&slot);
//! conductor.register("producer", move |w| {
//!     let (items, changed) = &*buf;
//!     for value in [42, 17] {
//!         let mut items = w.wait_while(changed, w.lock(items)?, |q| !q.is_empty())?;
//!         items.push_back(value);
//!         changed.notify_all();
//!     }
//!     assert_eq!(w.beat(), 1);
//!     Ok(())
//! })?;
//!
//! let buf = Arc::clone(&slot);
//! conductor.register("consumer", move |w| {
//!     w.wait_for_beat(1)?;
//!     let (items, changed) = &*buf;
//!     for expected in [42, 17] {
//!         let mut items = w.wait_while(changed, w.lock(items)?, |q| q.is_empty())?;
//!         assert_eq!(items.pop_front(), Some(expected));
//!         changed.notify_all();
//!     }
//!     Ok(())
//! })?;
//!
//! conductor.wait_till_finished()?;
//! # Ok::<(), lockstep::ConductorError>(())
//! ```
//!
//! # Configuration
//!
//! [`Conductor::new`] uses fixed defaults. [`ConfigLoader`] merges a
//! `lockstep.toml` file and `LOCKSTEP_*` environment variables on top of
//! them for [`Conductor::with_config`].

mod barrier;
mod clock;
mod conductor;
mod config;
mod error;
mod failure;
mod monitor;
mod registry;
mod scenario;
mod status;
mod sync;
mod worker;

pub use conductor::Conductor;
pub use config::{
    CONFIG_FILE_NAME, ConductorConfig, ConfigLoader, DEFAULT_CANCEL_GRACE_MS,
    DEFAULT_CLOCK_PERIOD_MS, DEFAULT_DEADLOCK_THRESHOLD, DEFAULT_TIMEOUT_SECS,
};
pub use error::{ConductorError, Failure, FailureKind, UsageError};
pub use registry::{WorkerHandle, WorkerId};
pub use status::WorkerStatus;
pub use worker::Worker;

#[cfg(test)]
mod tests;
