//! Core error types for scenario documents.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or validating scenario documents.
#[derive(Debug, Error)]
pub enum Error {
    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    // Validation errors
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },
}

impl Error {
    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid duration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}
