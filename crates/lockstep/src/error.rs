//! Error types for conducting a scenario.
//!
//! Three layers:
//!
//! - [`UsageError`]: caller misuse, returned synchronously at the call site.
//! - [`Failure`]: the single outcome that ends a scenario (timeout, suspected
//!   deadlock, or a failing worker). Stored in the failure channel and
//!   re-raised by `conduct`.
//! - [`ConductorError`]: what every fallible API returns.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Caller misuse of the conductor API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// Beat 0 is the implicit starting beat.
    #[error("cannot wait for beat zero")]
    WaitForBeatZero,

    #[error("clock period must be positive")]
    NonPositiveClockPeriod,

    #[error("timeout must be positive")]
    NonPositiveTimeout,

    #[error("deadlock threshold must be positive")]
    ZeroDeadlockThreshold,

    #[error("conduct cannot be called twice")]
    ConductTwice,

    #[error("registerAfterFinished")]
    RegisterAfterFinished,

    /// `conduct` and `when_finished` belong to the thread that created the
    /// conductor.
    #[error("{operation} can only be called by the thread that created the conductor")]
    NotOrchestratorThread { operation: &'static str },

    #[error("when_finished cannot be invoked after conducting has begun")]
    WhenFinishedAfterConduct,
}

/// Coarse classification of a [`Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    Deadlock,
    WorkerFailure,
}

/// The outcome that ended a scenario.
///
/// Only the first failure of a scenario is ever recorded; it is what
/// `Conductor::conduct` returns once every worker has stopped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Failure {
    /// A worker stayed runnable with no clock progress for longer than the
    /// configured timeout.
    #[error("scenario timed out: workers kept running for more than {timeout:?} without the clock advancing")]
    Timeout { timeout: Duration },

    /// Every live worker was blocked, with nobody waiting for a beat, for
    /// `cycles` consecutive clock periods.
    #[error("deadlock suspected: no worker could make progress for {cycles} clock periods ({waited:?})")]
    DeadlockSuspected { cycles: u32, waited: Duration },

    /// A worker body returned an error.
    #[error("worker `{worker}` failed: {source}")]
    Worker {
        worker: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    /// A worker body panicked.
    #[error("worker `{worker}` panicked: {message}")]
    Panicked { worker: String, message: String },
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::DeadlockSuspected { .. } => FailureKind::Deadlock,
            Self::Worker { .. } | Self::Panicked { .. } => FailureKind::WorkerFailure,
        }
    }

    /// Name of the failing worker, for worker failures.
    pub fn worker(&self) -> Option<&str> {
        match self {
            Self::Worker { worker, .. } | Self::Panicked { worker, .. } => Some(worker),
            Self::Timeout { .. } | Self::DeadlockSuspected { .. } => None,
        }
    }

    pub(crate) fn from_body_error(worker: &str, error: anyhow::Error) -> Self {
        let source: Box<dyn StdError + Send + Sync> = error.into();
        Self::Worker {
            worker: worker.to_string(),
            source: Arc::from(source),
        }
    }

    pub(crate) fn from_panic(worker: &str, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            worker: worker.to_string(),
            message,
        }
    }
}

/// Errors returned by the conductor and by worker blocking points.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    #[error("cannot register two workers with the same name: {name}")]
    DuplicateName { name: String },

    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The scenario ended with a recorded failure.
    #[error(transparent)]
    Failed(#[from] Failure),

    /// The scenario is being torn down; the worker should return.
    #[error("scenario was cancelled")]
    Cancelled,

    /// Another thread interrupted this worker while it was blocked.
    #[error("worker `{worker}` was interrupted")]
    Interrupted { worker: String },

    #[error("failed to spawn thread for worker `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl ConductorError {
    /// The recorded scenario failure, if this error carries one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.failure()
            .is_some_and(|f| f.kind() == FailureKind::Timeout)
    }

    pub fn is_deadlock(&self) -> bool {
        self.failure()
            .is_some_and(|f| f.kind() == FailureKind::Deadlock)
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::DuplicateName { .. })
    }
}
