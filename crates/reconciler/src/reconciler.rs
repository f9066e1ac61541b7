//! Scenario reconciler.

use std::sync::Arc;

use itertools::Itertools;
use scenarist_core::{
    Condition, ConditionStatus, ConditionType, ExpectationResult, JobDescriptor, JobTerminal,
    ObjectKey, Phase, Scenario,
};
use tracing::{debug, info, instrument, warn};

use crate::builder::JobBuilder;
use crate::config::{JobWaitMode, ReconcilerConfig};
use crate::error::{Error, EvaluationError, Result};
use crate::evaluator::{CheckerRegistry, ExpectationEvaluator};
use crate::executor::{CancelSignal, JobExecutor};
use crate::monitor::MonitorClient;
use crate::store::ScenarioStore;
use crate::substrate::JobSubstrate;
use crate::types::{ReconcileOutcome, ReconcileStep};

/// Which part of the resource a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTarget {
    /// The status sub-resource.
    Status,
    /// Metadata and spec.
    Object,
}

impl WriteTarget {
    const fn operation(self) -> &'static str {
        match self {
            Self::Status => "update_status",
            Self::Object => "update",
        }
    }
}

/// Outcome of a finished job, computed before anything is written.
enum Settlement {
    Succeeded(ExpectationResult),
    Failed {
        reason: &'static str,
        error: Error,
        result: Option<ExpectationResult>,
    },
}

impl Settlement {
    const fn failed(reason: &'static str, error: Error, result: Option<ExpectationResult>) -> Self {
        Self::Failed {
            reason,
            error,
            result,
        }
    }

    fn into_outcome(self) -> Result<ReconcileOutcome> {
        match self {
            Self::Succeeded(_) => Ok(ReconcileOutcome::done(ReconcileStep::Succeeded)),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Drives one scenario toward "ran once, expectations evaluated".
///
/// Each call to [`reconcile`](Self::reconcile) performs one step of the state
/// machine and reports what it did and whether it wants to be called again.
pub struct ScenarioReconciler {
    store: Arc<dyn ScenarioStore>,
    executor: JobExecutor,
    evaluator: ExpectationEvaluator,
    config: ReconcilerConfig,
}

impl ScenarioReconciler {
    pub fn builder() -> ScenarioReconcilerBuilder {
        ScenarioReconcilerBuilder::new()
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile without an external cancel signal.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        self.reconcile_with_cancel(key, &CancelSignal::never()).await
    }

    /// Reconcile; `cancel` interrupts a blocking wait on the job.
    #[instrument(skip_all, fields(scenario = %key))]
    pub async fn reconcile_with_cancel(
        &self,
        key: &ObjectKey,
        cancel: &CancelSignal,
    ) -> Result<ReconcileOutcome> {
        let mut scenario = match self.store.get(key).await {
            Ok(scenario) => scenario,
            Err(e) if e.is_not_found() => {
                debug!("Scenario not found, ignoring since it must have been deleted");
                return Ok(ReconcileOutcome::done(ReconcileStep::NotFound));
            }
            Err(e) => return Err(e),
        };

        if scenario.status.conditions.is_empty() {
            scenario = self
                .set_condition(
                    key,
                    Condition::new(
                        ConditionType::Progressing,
                        ConditionStatus::Unknown,
                        "Reconciling",
                        "Starting Reconciling",
                    ),
                )
                .await?;
        }

        let finalizer = self.config.finalizer.as_str();
        if !scenario.metadata.has_finalizer(finalizer) && !scenario.metadata.is_being_deleted() {
            info!(finalizer, "Adding finalizer");
            scenario = self
                .mutate_with_retry(key, WriteTarget::Object, |s| {
                    s.metadata.add_finalizer(finalizer);
                })
                .await?;
        }

        if scenario.metadata.is_being_deleted() {
            return self.finalize(&scenario).await;
        }

        let generation = scenario.metadata.generation;
        if scenario.status.phase == Phase::Succeeded {
            debug!("Scenario already succeeded");
            return Ok(ReconcileOutcome::done(ReconcileStep::AlreadySucceeded));
        }
        if scenario.status.is_failed_for(generation) {
            debug!(generation, "Scenario already failed for this generation");
            return Ok(ReconcileOutcome::done(ReconcileStep::AlreadyFailed));
        }

        let descriptor = self.job_descriptor(&scenario);
        match self.config.wait_mode {
            JobWaitMode::Requeue => self.reconcile_requeue(&scenario, &descriptor).await,
            JobWaitMode::Blocking => self.reconcile_blocking(&scenario, &descriptor, cancel).await,
        }
    }

    fn job_descriptor(&self, scenario: &Scenario) -> JobDescriptor {
        JobBuilder::for_scenario(scenario)
            .with_prefix(&self.config.job_name_prefix)
            .build()
    }

    async fn finalize(&self, scenario: &Scenario) -> Result<ReconcileOutcome> {
        let finalizer = self.config.finalizer.as_str();
        if !scenario.metadata.has_finalizer(finalizer) {
            debug!("Scenario is being deleted and holds no finalizer of ours");
            return Ok(ReconcileOutcome::done(ReconcileStep::Finalized));
        }

        match self.run_finalizer(scenario).await {
            Ok(()) => Ok(ReconcileOutcome::done(ReconcileStep::Finalized)),
            Err(e) if e.is_not_found() => {
                debug!("Scenario disappeared during finalization");
                Ok(ReconcileOutcome::done(ReconcileStep::NotFound))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_finalizer(&self, scenario: &Scenario) -> Result<()> {
        let key = scenario.metadata.key();
        let name = &scenario.metadata.name;
        info!("Performing finalizer operations before deleting scenario");

        self.set_condition(
            &key,
            Condition::new(
                ConditionType::Available,
                ConditionStatus::Unknown,
                "Finalizing",
                format!("Performing finalizer operation for {name}"),
            ),
        )
        .await?;

        self.executor.cleanup(&self.job_descriptor(scenario)).await;

        self.set_condition(
            &key,
            Condition::new(
                ConditionType::Available,
                ConditionStatus::True,
                "Finalizing",
                format!("Successfully finalized {name}"),
            ),
        )
        .await?;

        let finalizer = self.config.finalizer.as_str();
        self.mutate_with_retry(&key, WriteTarget::Object, |s| {
            s.metadata.remove_finalizer(finalizer);
        })
        .await?;
        info!("Removed finalizer");
        Ok(())
    }

    async fn reconcile_requeue(
        &self,
        scenario: &Scenario,
        descriptor: &JobDescriptor,
    ) -> Result<ReconcileOutcome> {
        let key = scenario.metadata.key();
        let poll_interval = self.config.poll_interval;
        let awaited = scenario.status.active_job.as_deref() == Some(descriptor.name.as_str());

        let Some(job) = self.executor.find(descriptor).await? else {
            if awaited {
                let err = Error::job_vanished(&descriptor.name);
                warn!(job = %descriptor.name, "Submitted job disappeared");
                self.record_failure(&key, "JobVanished", &err.to_string(), None).await?;
                return Err(err);
            }

            self.executor.submit(descriptor).await?;
            self.record_active_job(&key, &descriptor.name).await?;
            return Ok(ReconcileOutcome::requeue_after(
                ReconcileStep::JobSubmitted,
                poll_interval,
            ));
        };

        let settlement = match job.terminal() {
            None => {
                if !awaited {
                    self.record_active_job(&key, &descriptor.name).await?;
                }
                debug!(job = %descriptor.name, "Job still running, requeueing");
                return Ok(ReconcileOutcome::requeue_after(
                    ReconcileStep::JobRunning,
                    poll_interval,
                ));
            }
            Some(JobTerminal::Failed) => {
                warn!(job = %descriptor.name, "Job failed");
                Settlement::failed("JobFailed", Error::job_failed(&descriptor.name), None)
            }
            Some(JobTerminal::Complete) => {
                info!(job = %descriptor.name, "Job completed");
                self.assess(scenario).await
            }
        };

        // Keep the job until the outcome is stored.
        self.record_settlement(&key, &settlement).await?;
        self.executor.cleanup(descriptor).await;
        settlement.into_outcome()
    }

    async fn reconcile_blocking(
        &self,
        scenario: &Scenario,
        descriptor: &JobDescriptor,
        cancel: &CancelSignal,
    ) -> Result<ReconcileOutcome> {
        let key = scenario.metadata.key();
        if self.executor.find(descriptor).await?.is_some() {
            info!(job = %descriptor.name, "Job already exists, skipping");
            return Ok(ReconcileOutcome::done(ReconcileStep::JobAlreadyExists));
        }

        let settlement = match self.executor.execute(descriptor, cancel).await {
            Ok(()) => self.assess(scenario).await,
            Err(Error::Cancelled) => {
                info!(job = %descriptor.name, "Wait for job cancelled");
                self.executor.cleanup(descriptor).await;
                return Err(Error::Cancelled);
            }
            Err(e) => {
                warn!(job = %descriptor.name, error = %e, "Job execution failed");
                let reason = match e {
                    Error::JobFailed { .. } => "JobFailed",
                    Error::JobVanished { .. } => "JobVanished",
                    _ => "JobError",
                };
                Settlement::failed(reason, e, None)
            }
        };

        let recorded = self.record_settlement(&key, &settlement).await;
        self.executor.cleanup(descriptor).await;
        recorded?;
        settlement.into_outcome()
    }

    /// Evaluate expectations without writing anything.
    async fn assess(&self, scenario: &Scenario) -> Settlement {
        let expectations = &scenario.spec.expectations;
        debug!(expectations = expectations.len(), "Evaluating expectations");

        match self.evaluator.evaluate(expectations).await {
            Err(e) => {
                warn!(error = %e, "Expectation evaluation failed");
                let reason = match e {
                    EvaluationError::ExpectationFailed { .. } => "ExpectationsFailed",
                    _ => "EvaluationError",
                };
                Settlement::failed(reason, e.into(), None)
            }
            Ok(result) if !result.passed => {
                let failures = result
                    .failed_expectations
                    .iter()
                    .map(|f| f.reason.clone())
                    .collect_vec();
                warn!(failed = failures.len(), "Expectations did not hold");
                let err = EvaluationError::ExpectationsFailed { failures };
                Settlement::failed("ExpectationsFailed", err.into(), Some(result))
            }
            Ok(result) => Settlement::Succeeded(result),
        }
    }

    async fn record_settlement(&self, key: &ObjectKey, settlement: &Settlement) -> Result<()> {
        match settlement {
            Settlement::Succeeded(result) => {
                self.record_success(key, result).await?;
                info!("Scenario succeeded");
            }
            Settlement::Failed {
                reason,
                error,
                result,
            } => {
                self.record_failure(key, reason, &error.to_string(), result.as_ref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn record_active_job(&self, key: &ObjectKey, job: &str) -> Result<Scenario> {
        self.mutate_with_retry(key, WriteTarget::Status, |s| {
            let generation = s.metadata.generation;
            s.status.active_job = Some(job.to_string());
            s.status.set_condition(
                Condition::new(
                    ConditionType::Progressing,
                    ConditionStatus::True,
                    "JobSubmitted",
                    format!("Waiting for job {job}"),
                ),
                generation,
            );
        })
        .await
    }

    async fn record_failure(
        &self,
        key: &ObjectKey,
        reason: &str,
        message: &str,
        result: Option<&ExpectationResult>,
    ) -> Result<Scenario> {
        self.mutate_with_retry(key, WriteTarget::Status, |s| {
            let generation = s.metadata.generation;
            s.status.active_job = None;
            if let Some(result) = result {
                s.status.result = Some(result.clone());
            }
            s.status.set_condition(
                Condition::new(ConditionType::Failed, ConditionStatus::True, reason, message),
                generation,
            );
            s.status.observed_generation = Some(generation);
        })
        .await
    }

    async fn record_success(&self, key: &ObjectKey, result: &ExpectationResult) -> Result<Scenario> {
        self.mutate_with_retry(key, WriteTarget::Status, |s| {
            let generation = s.metadata.generation;
            s.status.active_job = None;
            s.status.result = Some(result.clone());

            // A failure from an earlier generation no longer holds.
            let stale_failure = s
                .status
                .condition(ConditionType::Failed)
                .is_some_and(|c| c.status == ConditionStatus::True);
            if stale_failure {
                s.status.set_condition(
                    Condition::new(
                        ConditionType::Failed,
                        ConditionStatus::False,
                        "Recovered",
                        format!("Scenario succeeded at generation {generation}"),
                    ),
                    generation,
                );
            }

            s.status.set_condition(
                Condition::new(
                    ConditionType::Succeeded,
                    ConditionStatus::True,
                    "Success",
                    "Successfully run scenario expectations",
                ),
                generation,
            );
            s.status.observed_generation = Some(generation);
        })
        .await
    }

    async fn set_condition(&self, key: &ObjectKey, condition: Condition) -> Result<Scenario> {
        self.mutate_with_retry(key, WriteTarget::Status, |s| {
            let generation = s.metadata.generation;
            s.status.set_condition(condition.clone(), generation);
        })
        .await
    }

    /// Re-read, apply `mutate`, write; retry on conflict with backoff.
    async fn mutate_with_retry<F>(
        &self,
        key: &ObjectKey,
        target: WriteTarget,
        mut mutate: F,
    ) -> Result<Scenario>
    where
        F: FnMut(&mut Scenario) + Send,
    {
        let retry = &self.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let mut scenario = self.store.get(key).await?;
            mutate(&mut scenario);

            let written = match target {
                WriteTarget::Status => self.store.update_status(&scenario).await,
                WriteTarget::Object => self.store.update(&scenario).await,
            };

            match written {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() => {
                    if !retry.is_retryable(attempt) {
                        warn!(attempt, operation = target.operation(), "Giving up after conflicts");
                        return Err(Error::retry_exhausted(target.operation(), key, attempt));
                    }
                    let delay = retry.calculate_backoff(attempt);
                    debug!(attempt, ?delay, error = %e, "Write conflicted, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Builder for [`ScenarioReconciler`].
pub struct ScenarioReconcilerBuilder {
    store: Option<Arc<dyn ScenarioStore>>,
    substrate: Option<Arc<dyn JobSubstrate>>,
    registry: Option<CheckerRegistry>,
    monitor_client: Option<Arc<dyn MonitorClient>>,
    config: ReconcilerConfig,
}

impl ScenarioReconcilerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            substrate: None,
            registry: None,
            monitor_client: None,
            config: ReconcilerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ScenarioStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_substrate(mut self, substrate: Arc<dyn JobSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Use a custom set of checkers.
    #[must_use]
    pub fn with_registry(mut self, registry: CheckerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register the monitor-state checker backed by `client`.
    #[must_use]
    pub fn with_monitor_client(mut self, client: Arc<dyn MonitorClient>) -> Self {
        self.monitor_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ScenarioReconciler> {
        self.config.validate()?;

        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Scenario store is required"))?;
        let substrate = self
            .substrate
            .ok_or_else(|| Error::invalid_config("Job substrate is required"))?;
        let registry = match (self.registry, self.monitor_client) {
            (Some(registry), _) => registry,
            (None, Some(client)) => CheckerRegistry::with_monitor_client(client),
            (None, None) => {
                return Err(Error::invalid_config(
                    "A checker registry or monitor client is required",
                ));
            }
        };

        let evaluator = ExpectationEvaluator::new(registry)
            .with_policy(self.config.evaluation_policy)
            .with_default_timeout(self.config.default_check_timeout);
        let executor = JobExecutor::new(substrate, self.config.poll_interval);

        Ok(ScenarioReconciler {
            store,
            executor,
            evaluator,
            config: self.config,
        })
    }
}

impl Default for ScenarioReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
