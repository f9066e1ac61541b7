//! Reconciler configuration.
//!
//! Loaded from TOML; every field has a default so a partial file is valid:
//!
//! ```toml
//! finalizer = "scenarist.dev/finalizer"
//! poll_interval = "5s"
//! wait_mode = "requeue"
//! evaluation_policy = "all"
//!
//! [retry]
//! max_attempts = 5
//! ```

use std::path::Path;
use std::time::Duration;

use scenarist_core::duration::serde_humantime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::evaluator::EvaluationPolicy;
use crate::retry::RetryPolicy;

/// Finalizer token attached to every managed scenario.
pub const DEFAULT_FINALIZER: &str = "scenarist.dev/finalizer";

/// Prefix of derived job names.
pub const DEFAULT_JOB_NAME_PREFIX: &str = "scenario";

/// How the reconciler waits for a submitted job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobWaitMode {
    /// Submit, then return and ask to be re-invoked after `poll_interval`.
    #[default]
    Requeue,
    /// Poll inside the reconcile call until the job is terminal.
    Blocking,
}

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub finalizer: String,
    pub job_name_prefix: String,
    #[serde(with = "serde_humantime")]
    pub poll_interval: Duration,
    pub wait_mode: JobWaitMode,
    pub evaluation_policy: EvaluationPolicy,
    /// Bound for checks whose expectation declares no timeout.
    #[serde(with = "serde_humantime")]
    pub default_check_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
            job_name_prefix: DEFAULT_JOB_NAME_PREFIX.to_string(),
            poll_interval: Duration::from_secs(5),
            wait_mode: JobWaitMode::default(),
            evaluation_policy: EvaluationPolicy::default(),
            default_check_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.finalizer.trim().is_empty() {
            return Err(Error::invalid_config("finalizer must not be empty"));
        }
        let prefix_ok = !self.job_name_prefix.is_empty()
            && self.job_name_prefix.len() <= 20
            && self
                .job_name_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !prefix_ok {
            return Err(Error::invalid_config(format!(
                "job_name_prefix '{}' must be 1-20 lowercase alphanumerics or '-'",
                self.job_name_prefix
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be positive"));
        }
        if self.default_check_timeout.is_zero() {
            return Err(Error::invalid_config("default_check_timeout must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_wait_mode(mut self, mode: JobWaitMode) -> Self {
        self.wait_mode = mode;
        self
    }

    #[must_use]
    pub const fn with_evaluation_policy(mut self, policy: EvaluationPolicy) -> Self {
        self.evaluation_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_default_check_timeout(mut self, timeout: Duration) -> Self {
        self.default_check_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Config with short intervals for tests and simulations.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            default_check_timeout: Duration::from_secs(1),
            retry: RetryPolicy::new(5, 1, 5).without_jitter(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.wait_mode, JobWaitMode::Requeue);
        assert_eq!(config.evaluation_policy, EvaluationPolicy::All);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReconcilerConfig::from_toml_str(
            r#"
poll_interval = "250ms"
wait_mode = "blocking"
evaluation_policy = "first_matching"

[retry]
max_attempts = 2
"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.wait_mode, JobWaitMode::Blocking);
        assert_eq!(config.evaluation_policy, EvaluationPolicy::FirstMatching);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_backoff_ms, 10);
        assert_eq!(config.finalizer, DEFAULT_FINALIZER);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ReconcilerConfig::from_toml_str("poll_interval = \"0s\"").is_err());
        assert!(ReconcilerConfig::from_toml_str("job_name_prefix = \"Bad_Prefix\"").is_err());
        assert!(ReconcilerConfig::from_toml_str("finalizer = \"\"").is_err());
        assert!(ReconcilerConfig::from_toml_str("poll_interval = \"often\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "finalizer = \"example.com/cleanup\"").unwrap();

        let config = ReconcilerConfig::load(file.path()).unwrap();
        assert_eq!(config.finalizer, "example.com/cleanup");
    }

    #[test]
    fn test_load_missing_file() {
        let err = ReconcilerConfig::load("/nonexistent/scenarist.toml").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
