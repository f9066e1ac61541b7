//! Expectation evaluation.
//!
//! Checkers are registered per [`CheckerKind`]; dispatch looks up the kind of
//! each expectation's populated payload. Adding a provider means a new
//! [`Checker`] variant, a checker implementation and one `register` call.

pub mod monitor_state;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use itertools::Itertools;
use scenarist_core::{Checker, CheckerKind, Expectation, ExpectationResult, FailedExpectation};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use monitor_state::MonitorStateChecker;

use crate::error::EvaluationError;
use crate::monitor::MonitorClient;

/// Reason recorded for an expectation with no checker payload.
pub const NO_PAYLOAD_REASON: &str = "expectation has no checker payload";

/// Which expectations an evaluation looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPolicy {
    /// Evaluate every expectation and aggregate the verdicts.
    #[default]
    All,
    /// Evaluate only the first expectation with a registered checker.
    FirstMatching,
}

/// Outcome of a single check that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckVerdict {
    Passed,
    Failed { reason: String },
}

impl CheckVerdict {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// A strategy that decides whether one kind of expectation holds.
#[async_trait]
pub trait ExpectationChecker: Send + Sync {
    fn kind(&self) -> CheckerKind;

    /// Run the check. `Err` means the check could not be performed at all.
    async fn check(&self, checker: &Checker) -> Result<CheckVerdict, EvaluationError>;
}

/// Checker implementations keyed by kind.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<CheckerKind, Arc<dyn ExpectationChecker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in monitor-state checker.
    pub fn with_monitor_client(client: Arc<dyn MonitorClient>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MonitorStateChecker::new(client)));
        registry
    }

    /// Register a checker, replacing any previous one of the same kind.
    pub fn register(&mut self, checker: Arc<dyn ExpectationChecker>) {
        self.checkers.insert(checker.kind(), checker);
    }

    pub fn get(&self, kind: CheckerKind) -> Option<&Arc<dyn ExpectationChecker>> {
        self.checkers.get(&kind)
    }

    pub fn contains(&self, kind: CheckerKind) -> bool {
        self.checkers.contains_key(&kind)
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<CheckerKind> {
        self.checkers.keys().copied().sorted().collect_vec()
    }
}

impl fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Evaluates a scenario's expectations against live systems.
#[derive(Debug, Clone)]
pub struct ExpectationEvaluator {
    registry: CheckerRegistry,
    policy: EvaluationPolicy,
    default_timeout: Duration,
}

impl ExpectationEvaluator {
    pub fn new(registry: CheckerRegistry) -> Self {
        Self {
            registry,
            policy: EvaluationPolicy::default(),
            default_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: EvaluationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound for expectations that declare no timeout.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub const fn policy(&self) -> EvaluationPolicy {
        self.policy
    }

    /// Evaluate `expectations` under the configured policy.
    ///
    /// With [`EvaluationPolicy::All`] failed verdicts are reported in the
    /// returned result (`passed == false`); only checks that could not run
    /// produce an `Err`. With [`EvaluationPolicy::FirstMatching`] a failed
    /// verdict is an [`EvaluationError::ExpectationFailed`].
    pub async fn evaluate(
        &self,
        expectations: &[Expectation],
    ) -> Result<ExpectationResult, EvaluationError> {
        let started = Instant::now();
        match self.policy {
            EvaluationPolicy::All => self.evaluate_all(expectations, started).await,
            EvaluationPolicy::FirstMatching => {
                self.evaluate_first_matching(expectations, started).await
            }
        }
    }

    async fn evaluate_all(
        &self,
        expectations: &[Expectation],
        started: Instant,
    ) -> Result<ExpectationResult, EvaluationError> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for expectation in expectations {
            let Some(checker) = expectation.checker() else {
                failed.push(FailedExpectation {
                    expectation: expectation.clone(),
                    reason: NO_PAYLOAD_REASON.to_string(),
                });
                continue;
            };

            match self.run_check(expectation, &checker).await? {
                CheckVerdict::Passed => succeeded.push(expectation.clone()),
                CheckVerdict::Failed { reason } => failed.push(FailedExpectation {
                    expectation: expectation.clone(),
                    reason,
                }),
            }
        }

        debug!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            "Evaluated expectations"
        );
        Ok(ExpectationResult::new(started.elapsed(), succeeded, failed))
    }

    async fn evaluate_first_matching(
        &self,
        expectations: &[Expectation],
        started: Instant,
    ) -> Result<ExpectationResult, EvaluationError> {
        let (expectation, checker) = expectations
            .iter()
            .find_map(|e| {
                e.checker()
                    .filter(|c| self.registry.contains(c.kind()))
                    .map(|c| (e, c))
            })
            .ok_or(EvaluationError::NoCheckerFound)?;

        match self.run_check(expectation, &checker).await? {
            CheckVerdict::Passed => Ok(ExpectationResult::new(
                started.elapsed(),
                vec![expectation.clone()],
                Vec::new(),
            )),
            CheckVerdict::Failed { reason } => Err(EvaluationError::ExpectationFailed { reason }),
        }
    }

    async fn run_check(
        &self,
        expectation: &Expectation,
        checker: &Checker,
    ) -> Result<CheckVerdict, EvaluationError> {
        let kind = checker.kind();
        let implementation = self
            .registry
            .get(kind)
            .ok_or(EvaluationError::UnregisteredChecker { kind })?;

        let timeout = expectation
            .timeout()
            .map_err(|e| {
                EvaluationError::invalid_timeout(
                    expectation.timeout.clone().unwrap_or_default(),
                    e.to_string(),
                )
            })?
            .unwrap_or(self.default_timeout);

        debug!(%kind, ?timeout, "Running expectation check");
        tokio::time::timeout(timeout, implementation.check(checker))
            .await
            .map_err(|_| EvaluationError::Timeout { kind, timeout })?
    }
}
