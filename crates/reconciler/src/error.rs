//! Error types for the reconciler crate.

use std::time::Duration;

use scenarist_core::CheckerKind;
use thiserror::Error;

use crate::monitor::MonitorError;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Object missing from the store or substrate.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// Optimistic-concurrency violation on write.
    #[error("conflict writing '{key}': {reason}")]
    Conflict { key: String, reason: String },

    #[error("{operation} on '{key}' gave up after {attempts} conflicting attempts")]
    RetryExhausted {
        operation: String,
        key: String,
        attempts: u32,
    },

    /// The job reached the `Failed` condition.
    #[error("scenario job is failed")]
    JobFailed { job: String },

    /// The job disappeared after it was submitted.
    #[error("scenario job '{job}' disappeared before reaching a terminal condition")]
    JobVanished { job: String },

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("substrate operation '{operation}' failed: {reason}")]
    Substrate { operation: String, reason: String },

    #[error("reconcile cancelled")]
    Cancelled,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a retry exhausted error.
    pub fn retry_exhausted(operation: impl Into<String>, key: impl ToString, attempts: u32) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            key: key.to_string(),
            attempts,
        }
    }

    /// Create a job failed error.
    pub fn job_failed(job: impl Into<String>) -> Self {
        Self::JobFailed { job: job.into() }
    }

    /// Create a job vanished error.
    pub fn job_vanished(job: impl Into<String>) -> Self {
        Self::JobVanished { job: job.into() }
    }

    /// Create a substrate error.
    pub fn substrate(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Substrate {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Failures while evaluating expectations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("malformed monitor id '{id}': {reason}")]
    MalformedMonitorId { id: String, reason: String },

    #[error("monitor query failed: {0}")]
    Monitor(#[from] MonitorError),

    #[error("{kind} check timed out after {timeout:?}")]
    Timeout { kind: CheckerKind, timeout: Duration },

    #[error("invalid expectation timeout '{value}': {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error("no checker registered for {kind}")]
    UnregisteredChecker { kind: CheckerKind },

    #[error("no expectation with a registered checker found")]
    NoCheckerFound,

    /// A single expectation did not hold.
    #[error("{reason}")]
    ExpectationFailed { reason: String },

    /// One or more expectations did not hold.
    #[error("{} expectation(s) failed: {}", .failures.len(), .failures.join("; "))]
    ExpectationsFailed { failures: Vec<String> },
}

impl EvaluationError {
    /// Create a malformed monitor id error.
    pub fn malformed_monitor_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMonitorId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid timeout error.
    pub fn invalid_timeout(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
