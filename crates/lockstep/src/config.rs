//! Conductor configuration.
//!
//! Settings are merged from several sources, lowest precedence first:
//! 1. Built-in defaults (10 ms clock period, 5 s timeout)
//! 2. `lockstep.toml` in the project directory
//! 3. Environment variables (`LOCKSTEP_*` prefix, e.g. `LOCKSTEP_TIMEOUT_SECS`)
//!
//! `Conductor::new()` always uses the built-in defaults; loaded settings are
//! opt-in through `Conductor::with_config`.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::UsageError;

/// Default clock period, in milliseconds.
pub const DEFAULT_CLOCK_PERIOD_MS: u64 = 10;

/// Default stall budget, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Consecutive fully-quiescent monitor cycles before a deadlock is declared.
pub const DEFAULT_DEADLOCK_THRESHOLD: u32 = 50;

/// How long the orchestrator waits for cancelled workers before detaching.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 1_000;

/// Name of the project-level configuration file.
pub const CONFIG_FILE_NAME: &str = "lockstep.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Monitor sampling period.
    pub clock_period_ms: u64,
    /// Maximum time workers may keep running without the clock advancing.
    pub timeout_secs: u64,
    pub deadlock_threshold: u32,
    pub cancel_grace_ms: u64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            clock_period_ms: DEFAULT_CLOCK_PERIOD_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            deadlock_threshold: DEFAULT_DEADLOCK_THRESHOLD,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
        }
    }
}

impl ConductorConfig {
    /// Loads configuration from the current directory and environment.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    pub fn clock_period(&self) -> Duration {
        Duration::from_millis(self.clock_period_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Sets the clock period, rounded up to a whole millisecond.
    pub fn with_clock_period(mut self, period: Duration) -> Self {
        self.clock_period_ms = whole_units(period, Duration::from_millis(1));
        self
    }

    /// Sets the timeout, rounded up to a whole second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = whole_units(timeout, Duration::from_secs(1));
        self
    }

    pub fn with_deadlock_threshold(mut self, cycles: u32) -> Self {
        self.deadlock_threshold = cycles;
        self
    }

    /// Sets the cancellation grace period, rounded up to a whole millisecond.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = whole_units(grace, Duration::from_millis(1));
        self
    }

    pub fn validate(&self) -> Result<(), UsageError> {
        if self.clock_period_ms == 0 {
            return Err(UsageError::NonPositiveClockPeriod);
        }
        if self.timeout_secs == 0 {
            return Err(UsageError::NonPositiveTimeout);
        }
        if self.deadlock_threshold == 0 {
            return Err(UsageError::ZeroDeadlockThreshold);
        }
        Ok(())
    }
}

/// Number of `unit`s needed to cover `duration`. Only zero maps to zero.
fn whole_units(duration: Duration, unit: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(unit.as_nanos())).unwrap_or(u64::MAX)
}

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    env_overrides: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Creates a loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "LOCKSTEP".to_string(),
            env_overrides: None,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "LOCKSTEP").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Reads environment variables from `vars` instead of the process
    /// environment.
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_overrides = Some(vars);
        self
    }

    /// Merges every source and validates the result.
    pub fn load(self) -> Result<ConductorConfig> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ConductorConfig::default())?);

        let project_file = self.project_dir.join(CONFIG_FILE_NAME);
        if project_file.exists() {
            builder = builder.add_source(
                config::File::from(project_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Single underscore after the prefix, no nesting: field names
        // already contain underscores.
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .try_parsing(true)
                .source(self.env_overrides),
        );

        let merged = builder.build().context("failed to build conductor configuration")?;
        let loaded: ConductorConfig = merged
            .try_deserialize()
            .context("failed to deserialize conductor configuration")?;
        loaded
            .validate()
            .context("invalid conductor configuration")?;

        Ok(loaded)
    }

    /// Loads configuration, falling back to the defaults on any error.
    pub fn load_or_default(self) -> ConductorConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use test_case::test_case;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_conduct_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.clock_period(), Duration::from_millis(10));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.deadlock_threshold, 50);
        assert!(config.validate().is_ok());
    }

    #[test_case(ConductorConfig::default().with_clock_period(Duration::ZERO), UsageError::NonPositiveClockPeriod; "zero period")]
    #[test_case(ConductorConfig::default().with_timeout(Duration::ZERO), UsageError::NonPositiveTimeout; "zero timeout")]
    #[test_case(ConductorConfig::default().with_deadlock_threshold(0), UsageError::ZeroDeadlockThreshold; "zero threshold")]
    fn invalid_settings_are_rejected(config: ConductorConfig, expected: UsageError) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test_case(Duration::from_millis(900), 1; "sub-second rounds up")]
    #[test_case(Duration::from_secs(2), 2; "whole seconds are kept")]
    #[test_case(Duration::from_millis(2_001), 3; "partial second rounds up")]
    fn timeout_rounds_up_to_whole_seconds(timeout: Duration, expected_secs: u64) {
        let config = ConductorConfig::default().with_timeout(timeout);
        assert_eq!(config.timeout_secs, expected_secs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn millisecond_settings_round_up() {
        let config = ConductorConfig::default()
            .with_clock_period(Duration::from_micros(100))
            .with_cancel_grace(Duration::from_micros(1_500));

        assert_eq!(config.clock_period(), Duration::from_millis(1));
        assert_eq!(config.cancel_grace(), Duration::from_millis(2));
        assert_eq!(
            ConductorConfig::default()
                .with_clock_period(Duration::ZERO)
                .validate(),
            Err(UsageError::NonPositiveClockPeriod)
        );
    }

    #[test]
    fn loads_defaults_from_empty_directory() {
        let dir = tempdir().expect("failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_source(HashMap::new())
            .load()
            .expect("failed to load config");

        assert_eq!(config, ConductorConfig::default());
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempdir().expect("failed to create temp dir");
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "clock_period_ms = 25\ndeadlock_threshold = 10\n",
        )
        .expect("failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_source(HashMap::new())
            .load()
            .expect("failed to load config");

        assert_eq!(config.clock_period_ms, 25);
        assert_eq!(config.deadlock_threshold, 10);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn environment_overrides_project_file() {
        let dir = tempdir().expect("failed to create temp dir");
        fs::write(dir.path().join(CONFIG_FILE_NAME), "timeout_secs = 9\n")
            .expect("failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_source(env(&[("LOCKSTEP_TIMEOUT_SECS", "2")]))
            .load()
            .expect("failed to load config");

        assert_eq!(config.timeout_secs, 2);
    }

    #[test]
    fn invalid_loaded_config_is_an_error() {
        let dir = tempdir().expect("failed to create temp dir");
        let result = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_source(env(&[("LOCKSTEP_CLOCK_PERIOD_MS", "0")]))
            .load();

        assert!(result.is_err());
        assert_eq!(
            ConfigLoader::new()
                .with_project_dir(dir.path())
                .with_env_source(env(&[("LOCKSTEP_CLOCK_PERIOD_MS", "0")]))
                .load_or_default(),
            ConductorConfig::default()
        );
    }
}
