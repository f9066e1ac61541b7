//! Clients for external monitoring systems.
//!
//! The evaluator only needs one question answered: "what state does monitor
//! N report right now?". Clients are constructed once and injected.

pub mod datadog;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

pub use datadog::{DatadogClient, DatadogConfig};

/// Errors talking to a monitoring provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("request failed: {reason}")]
    Request { reason: String },

    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("could not decode response: {reason}")]
    Decode { reason: String },

    #[error("missing credentials: {variable} is not set")]
    MissingCredentials { variable: String },

    #[error("monitor {monitor_id} not found")]
    NotFound { monitor_id: i64 },
}

/// Reports the live state of a monitor.
#[async_trait]
pub trait MonitorClient: Send + Sync {
    /// Current overall state of `monitor_id`, e.g. `Alert` or `OK`.
    async fn monitor_state(&self, monitor_id: i64) -> Result<String, MonitorError>;
}

/// Monitor client answering from a fixed table.
#[derive(Default)]
pub struct StaticMonitorClient {
    states: RwLock<HashMap<i64, String>>,
    calls: AtomicUsize,
}

impl StaticMonitorClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client that reports `state` for `monitor_id`.
    pub fn with_state(monitor_id: i64, state: impl Into<String>) -> Self {
        Self::from_states([(monitor_id, state.into())])
    }

    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        Self {
            states: RwLock::new(states.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub async fn set_state(&self, monitor_id: i64, state: impl Into<String>) {
        self.states.write().await.insert(monitor_id, state.into());
    }

    /// Number of queries answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MonitorClient for StaticMonitorClient {
    async fn monitor_state(&self, monitor_id: i64) -> Result<String, MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.states
            .read()
            .await
            .get(&monitor_id)
            .cloned()
            .ok_or(MonitorError::NotFound { monitor_id })
    }
}
