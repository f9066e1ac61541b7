//! Monitor-state checker.

use std::sync::Arc;

use async_trait::async_trait;
use scenarist_core::{Checker, CheckerKind, MonitorCheck};
use tracing::debug;

use super::{CheckVerdict, ExpectationChecker};
use crate::error::EvaluationError;
use crate::monitor::MonitorClient;

/// Passes when a monitor's reported state equals the expected one.
///
/// The comparison is exact and case-sensitive.
pub struct MonitorStateChecker {
    client: Arc<dyn MonitorClient>,
}

impl MonitorStateChecker {
    pub fn new(client: Arc<dyn MonitorClient>) -> Self {
        Self { client }
    }

    async fn check_monitor(&self, check: &MonitorCheck) -> Result<CheckVerdict, EvaluationError> {
        let monitor_id: i64 = check
            .monitor_id
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                EvaluationError::malformed_monitor_id(&check.monitor_id, e.to_string())
            })?;

        let observed = self.client.monitor_state(monitor_id).await?;
        debug!(monitor_id, expected = %check.expected_state, observed = %observed, "Monitor state");

        if observed == check.expected_state {
            Ok(CheckVerdict::Passed)
        } else {
            Ok(CheckVerdict::failed(format!(
                "monitor {monitor_id} state is not {}, got {observed}",
                check.expected_state
            )))
        }
    }
}

#[async_trait]
impl ExpectationChecker for MonitorStateChecker {
    fn kind(&self) -> CheckerKind {
        CheckerKind::MonitorState
    }

    async fn check(&self, checker: &Checker) -> Result<CheckVerdict, EvaluationError> {
        match checker {
            Checker::MonitorState(check) => self.check_monitor(check).await,
        }
    }
}
