//! Human-readable durations (`30s`, `1m`, `1h30m`) for manifests and config.

use std::time::Duration;

use crate::error::{Error, Result};

/// Parse a duration string such as `30s`, `5m` or `1h 30m`.
pub fn parse(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_duration(value, "empty duration"));
    }
    humantime::parse_duration(trimmed).map_err(|e| Error::invalid_duration(value, e.to_string()))
}

/// Format a duration the same way [`parse`] reads it.
pub fn format(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Serde adapter for `Duration` fields stored as humantime strings.
pub mod serde_humantime {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse(&s).map_err(serde::de::Error::custom)
    }
}
