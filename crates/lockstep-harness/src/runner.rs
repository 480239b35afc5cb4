//! Repeatedly conducting a subject.

use std::sync::Arc;

use lockstep::{Conductor, ConductorConfig, ConductorError};

use crate::subject::MultiThreadedTest;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A repetition ended with a usage error or a scenario failure.
    #[error("repetition {repetition} failed: {source}")]
    Conduct {
        repetition: usize,
        #[source]
        source: ConductorError,
    },

    /// Every repetition passed but the subject's final check did not.
    #[error("finish check failed: {0}")]
    Finish(#[source] anyhow::Error),
}

impl HarnessError {
    /// The conductor error behind a failed repetition.
    pub fn conductor_error(&self) -> Option<&ConductorError> {
        match self {
            Self::Conduct { source, .. } => Some(source),
            Self::Finish(_) => None,
        }
    }
}

/// Runs a [`MultiThreadedTest`] subject.
///
/// Each repetition uses a fresh [`Conductor`] but the same subject, so
/// state accumulates across repetitions. `finish` runs once, after the
/// last repetition.
pub struct Runner<T> {
    subject: Arc<T>,
    times: usize,
    config: ConductorConfig,
}

impl<T: MultiThreadedTest> Runner<T> {
    pub fn new(subject: Arc<T>) -> Self {
        Self {
            subject,
            times: 1,
            config: ConductorConfig::default(),
        }
    }

    /// Number of repetitions (default 1). Zero conducts nothing and only
    /// runs `finish`.
    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subject(&self) -> &Arc<T> {
        &self.subject
    }

    /// Conducts every repetition, stopping at the first failure, then runs
    /// the subject's `finish` check.
    pub fn run(self) -> Result<(), HarnessError> {
        for repetition in 0..self.times {
            tracing::debug!(repetition, times = self.times, "conducting repetition");
            self.conduct_once()
                .map_err(|source| HarnessError::Conduct { repetition, source })?;
        }
        self.subject.finish().map_err(HarnessError::Finish)
    }

    fn conduct_once(&self) -> Result<(), ConductorError> {
        let conductor = Conductor::with_config(self.config.clone());
        for threaded in T::threads() {
            let subject = Arc::clone(&self.subject);
            let body = threaded.body();
            conductor.register(threaded.worker_name(), move |w| body(&subject, w))?;
        }
        conductor.conduct()
    }
}
