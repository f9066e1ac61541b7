//! Datadog monitor client.
//!
//! Reads `overall_state` from `GET /api/v1/monitor/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{MonitorClient, MonitorError};

const DEFAULT_SITE: &str = "datadoghq.com";

/// Connection settings for the Datadog API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatadogConfig {
    pub site: String,
    pub api_key: String,
    pub app_key: String,
    pub timeout: Duration,
    /// Overrides `https://api.{site}`.
    pub base_url: Option<String>,
}

impl DatadogConfig {
    pub fn new(api_key: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            site: DEFAULT_SITE.to_string(),
            api_key: api_key.into(),
            app_key: app_key.into(),
            timeout: Duration::from_secs(10),
            base_url: None,
        }
    }

    /// Read `DD_API_KEY`, `DD_APP_KEY` (or `DD_APPLICATION_KEY`) and `DD_SITE`.
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("DD_API_KEY").ok_or_else(|| MonitorError::MissingCredentials {
            variable: "DD_API_KEY".to_string(),
        })?;
        let app_key = non_empty("DD_APP_KEY")
            .or_else(|| non_empty("DD_APPLICATION_KEY"))
            .ok_or_else(|| MonitorError::MissingCredentials {
                variable: "DD_APP_KEY".to_string(),
            })?;

        let mut config = Self::new(api_key, app_key);
        if let Some(site) = non_empty("DD_SITE") {
            config.site = site;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn monitor_url(&self, monitor_id: i64) -> String {
        let base = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://api.{}", self.site));
        format!("{}/api/v1/monitor/{monitor_id}", base.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct MonitorResponse {
    overall_state: Option<String>,
}

impl MonitorResponse {
    fn into_state(self) -> Result<String, MonitorError> {
        self.overall_state.ok_or_else(|| MonitorError::Decode {
            reason: "response has no overall_state".to_string(),
        })
    }
}

/// Datadog-backed [`MonitorClient`].
pub struct DatadogClient {
    config: DatadogConfig,
    http: reqwest::Client,
}

impl DatadogClient {
    pub fn new(config: DatadogConfig) -> Result<Self, MonitorError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MonitorError::Request {
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    pub const fn config(&self) -> &DatadogConfig {
        &self.config
    }
}

#[async_trait]
impl MonitorClient for DatadogClient {
    async fn monitor_state(&self, monitor_id: i64) -> Result<String, MonitorError> {
        let url = self.config.monitor_url(monitor_id);
        debug!(monitor_id, url = %url, "Querying Datadog monitor");

        let response = self
            .http
            .get(&url)
            .header("DD-API-KEY", &self.config.api_key)
            .header("DD-APPLICATION-KEY", &self.config.app_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MonitorError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MonitorError::NotFound { monitor_id });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json::<MonitorResponse>()
            .await
            .map_err(|e| MonitorError::Decode {
                reason: e.to_string(),
            })?
            .into_state()
    }
}
