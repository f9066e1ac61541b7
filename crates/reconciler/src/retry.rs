//! Backoff policy for conflicting writes.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff with optional jitter.
///
/// Defaults follow the usual retry-on-conflict budget: five attempts starting
/// at 10ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
            max_backoff_ms: 1000,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            base_backoff_ms,
            max_backoff_ms,
            use_jitter: true,
        }
    }

    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponential_delay = 2_u64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base_backoff_ms.checked_mul(factor))
            .unwrap_or(self.max_backoff_ms);
        let capped_delay = exponential_delay.min(self.max_backoff_ms);

        if self.use_jitter {
            let jitter_range = capped_delay.checked_div(4).unwrap_or(0).max(1);
            let jitter = rand::thread_rng().gen_range(0..jitter_range.saturating_mul(2));
            Duration::from_millis(capped_delay.saturating_add(jitter))
        } else {
            Duration::from_millis(capped_delay)
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub const fn is_retryable(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
