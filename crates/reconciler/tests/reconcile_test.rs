//! End-to-end reconcile tests against the in-memory collaborators.
//!
//! Tests verify that:
//! - A scenario runs its job once and records the evaluated outcome
//! - Repeated passes after a terminal outcome change nothing
//! - Deletion runs the finalizer protocol and releases the object
//! - Conflicting writes are retried within the configured budget

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use scenarist_core::{
    ConditionStatus, ConditionType, ContainerSpec, Expectation, Job, ObjectKey, Phase, Scenario,
    ScenarioSpec, Template,
};
use scenarist_reconciler::{
    cancel_pair, Error, EvaluationError, EvaluationPolicy, InMemoryJobSubstrate,
    InMemoryScenarioStore, JobBuilder, JobScript, JobSubstrate, JobWaitMode, MonitorClient,
    ReconcileOutcome, ReconcileStep, ReconcilerConfig, Requeue, ScenarioReconciler, ScenarioStore,
    StaticMonitorClient, DEFAULT_FINALIZER,
};

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

/// Test helper: Unwrap an error or panic with context
fn unwrap_err<T>(result: scenarist_reconciler::Result<T>, context: &str) -> Error {
    match result {
        Ok(_) => panic!("{}: expected an error", context),
        Err(e) => e,
    }
}

struct Harness {
    store: Arc<InMemoryScenarioStore>,
    substrate: Arc<InMemoryJobSubstrate>,
    monitors: Arc<StaticMonitorClient>,
    reconciler: Arc<ScenarioReconciler>,
}

impl Harness {
    fn new(script: JobScript, config: ReconcilerConfig) -> Self {
        let store = Arc::new(InMemoryScenarioStore::new());
        let substrate = Arc::new(InMemoryJobSubstrate::with_script(script));
        let monitors = Arc::new(StaticMonitorClient::with_state(12345, "Alert"));

        let reconciler = unwrap_result(
            ScenarioReconciler::builder()
                .with_store(Arc::clone(&store) as Arc<dyn ScenarioStore>)
                .with_substrate(Arc::clone(&substrate) as Arc<dyn JobSubstrate>)
                .with_monitor_client(Arc::clone(&monitors) as Arc<dyn MonitorClient>)
                .with_config(config)
                .build(),
            "reconciler should build",
        );

        Self {
            store,
            substrate,
            monitors,
            reconciler: Arc::new(reconciler),
        }
    }

    fn requeue(script: JobScript) -> Self {
        Self::new(script, ReconcilerConfig::for_testing())
    }

    async fn create(&self, name: &str, expectations: Vec<Expectation>) -> ObjectKey {
        let scenario = Scenario::new("drills", name).with_spec(ScenarioSpec::new(
            vec![Template::new(
                "attacker",
                ContainerSpec::new("attacker", "alpine:3.19").with_command(["cat", "/etc/shadow"]),
            )],
            expectations,
        ));
        unwrap_result(self.store.create(scenario).await, "create should succeed")
            .metadata
            .key()
    }

    async fn get(&self, key: &ObjectKey) -> Scenario {
        unwrap_result(self.store.get(key).await, "scenario should exist")
    }

    /// Reconcile until no requeue is requested or an error surfaces.
    async fn drive(&self, key: &ObjectKey) -> scenarist_reconciler::Result<ReconcileOutcome> {
        for _ in 0..50 {
            let outcome = self.reconciler.reconcile(key).await?;
            if !outcome.is_requeue() {
                return Ok(outcome);
            }
        }
        panic!("reconcile kept requeueing");
    }
}

fn alert_expectation() -> Vec<Expectation> {
    vec![Expectation::monitor("12345", "Alert")]
}

// ==========================================================================
// HAPPY PATH
// ==========================================================================

#[tokio::test]
async fn full_pass_records_success_last() {
    // GIVEN: A scenario whose job completes and whose monitor matches
    let h = Harness::requeue(JobScript::completes_after(1));
    let key = h.create("cred-dump", alert_expectation()).await;

    // WHEN: The dispatcher keeps calling reconcile while asked to
    let outcome = unwrap_result(h.drive(&key).await, "drive should succeed");

    // THEN: The last condition is Succeeded/True and the result passed
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::Succeeded));
    let scenario = h.get(&key).await;
    let last = scenario.status.conditions.last().map(|c| (c.condition_type, c.status));
    assert_eq!(last, Some((ConditionType::Succeeded, ConditionStatus::True)));
    assert_eq!(scenario.status.phase, Phase::Succeeded);
    assert_eq!(scenario.status.result.as_ref().map(|r| r.passed), Some(true));
    assert_eq!(scenario.status.observed_generation, Some(1));
    assert!(scenario.status.active_job.is_none());
    assert!(scenario.metadata.has_finalizer(DEFAULT_FINALIZER));

    // AND: The job was submitted once and cleaned up
    assert_eq!(h.substrate.create_calls(), 1);
    assert_eq!(h.substrate.job_count().await, 0);
    assert_eq!(h.monitors.calls(), 1);
}

#[tokio::test]
async fn requeue_mode_reports_progress_between_passes() {
    let h = Harness::requeue(JobScript::running_forever());
    let key = h.create("slow", alert_expectation()).await;
    let poll = h.reconciler.config().poll_interval;

    let first = unwrap_result(h.reconciler.reconcile(&key).await, "first pass");
    assert_eq!(first, ReconcileOutcome::requeue_after(ReconcileStep::JobSubmitted, poll));

    let second = unwrap_result(h.reconciler.reconcile(&key).await, "second pass");
    assert_eq!(second.step, ReconcileStep::JobRunning);
    assert_eq!(second.requeue, Requeue::After(poll));

    let scenario = h.get(&key).await;
    assert_eq!(scenario.status.phase, Phase::Progressing);
    assert!(scenario.status.active_job.is_some());
    assert_eq!(h.substrate.create_calls(), 1);
}

#[tokio::test]
async fn empty_expectations_pass() {
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("no-checks", vec![]).await;

    let outcome = unwrap_result(h.drive(&key).await, "drive should succeed");
    assert_eq!(outcome.step, ReconcileStep::Succeeded);
    assert_eq!(h.get(&key).await.status.result.map(|r| r.passed), Some(true));
}

#[tokio::test]
async fn scenarios_get_distinct_jobs() {
    let h = Harness::requeue(JobScript::running_forever());
    let a = h.create("same-name", alert_expectation()).await;
    let b = h.create("other-name", alert_expectation()).await;

    unwrap_result(h.reconciler.reconcile(&a).await, "reconcile a");
    unwrap_result(h.reconciler.reconcile(&b).await, "reconcile b");

    assert_eq!(h.substrate.job_count().await, 2);
    assert_ne!(
        h.get(&a).await.status.active_job,
        h.get(&b).await.status.active_job
    );
}

// ==========================================================================
// IDEMPOTENCE
// ==========================================================================

#[tokio::test]
async fn succeeded_scenario_is_left_alone() {
    // GIVEN: A scenario that already succeeded
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("done", alert_expectation()).await;
    unwrap_result(h.drive(&key).await, "drive should succeed");
    let before = h.get(&key).await;

    // WHEN: It is reconciled again
    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile");

    // THEN: Nothing is written and no job is submitted
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::AlreadySucceeded));
    let after = h.get(&key).await;
    assert_eq!(after.metadata.resource_version, before.metadata.resource_version);
    assert_eq!(after.status, before.status);
    assert_eq!(h.substrate.create_calls(), 1);
}

// ==========================================================================
// FAILURES
// ==========================================================================

#[tokio::test]
async fn failed_job_marks_scenario_failed() {
    let h = Harness::requeue(JobScript::fails_after(0));
    let key = h.create("broken", alert_expectation()).await;

    let err = unwrap_err(h.drive(&key).await, "drive should fail");
    assert!(matches!(err, Error::JobFailed { .. }));
    assert_eq!(err.to_string(), "scenario job is failed");

    let scenario = h.get(&key).await;
    assert_eq!(scenario.status.phase, Phase::Failed);
    let failed = scenario.status.condition(ConditionType::Failed);
    assert_eq!(failed.map(|c| c.message.as_str()), Some("scenario job is failed"));
    assert!(scenario.status.result.is_none());
    assert_eq!(h.substrate.job_count().await, 0);

    // Failures are not retried until the spec changes.
    let again = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile");
    assert_eq!(again.step, ReconcileStep::AlreadyFailed);
    assert_eq!(h.substrate.create_calls(), 1);
}

#[tokio::test]
async fn unmet_expectation_records_result_and_fails() {
    let h = Harness::requeue(JobScript::completes_after(0));
    h.monitors.set_state(12345, "OK").await;
    let key = h.create("quiet", alert_expectation()).await;

    let err = unwrap_err(h.drive(&key).await, "drive should fail");
    assert!(matches!(
        err,
        Error::Evaluation(EvaluationError::ExpectationsFailed { .. })
    ));

    let scenario = h.get(&key).await;
    assert_eq!(scenario.status.phase, Phase::Failed);
    let result = scenario.status.result.as_ref();
    assert_eq!(result.map(|r| r.passed), Some(false));
    let reasons: Vec<_> = result
        .map(|r| r.failed_expectations.iter().map(|f| f.reason.clone()).collect())
        .unwrap_or_default();
    assert_eq!(reasons, vec!["monitor 12345 state is not Alert, got OK".to_string()]);
    let message = scenario
        .status
        .condition(ConditionType::Failed)
        .map(|c| c.message.clone())
        .unwrap_or_default();
    assert!(message.contains("got OK"), "{message}");
}

#[tokio::test]
async fn spec_edit_after_failure_runs_again() {
    // GIVEN: A scenario that failed evaluation
    let h = Harness::requeue(JobScript::completes_after(0));
    h.monitors.set_state(12345, "OK").await;
    let key = h.create("retry-me", alert_expectation()).await;
    let _ = h.drive(&key).await;

    // WHEN: The monitor recovers and the spec is edited
    h.monitors.set_state(12345, "Alert").await;
    let mut edited = h.get(&key).await;
    edited.spec.expectations = vec![Expectation::monitor("12345", "Alert").with_timeout("1m")];
    let edited = unwrap_result(h.store.update(&edited).await, "spec update");
    assert_eq!(edited.metadata.generation, 2);

    // THEN: The scenario runs again and succeeds for the new generation
    let outcome = unwrap_result(h.drive(&key).await, "drive should succeed");
    assert_eq!(outcome.step, ReconcileStep::Succeeded);
    let scenario = h.get(&key).await;
    assert_eq!(scenario.status.observed_generation, Some(2));
    assert_eq!(scenario.status.phase, Phase::Succeeded);
    assert_eq!(h.substrate.create_calls(), 2);

    // AND: The earlier failure no longer reads as current
    let failed = scenario.status.condition(ConditionType::Failed);
    assert_eq!(failed.map(|c| c.status), Some(ConditionStatus::False));
    let succeeded = scenario.status.condition(ConditionType::Succeeded);
    assert_eq!(succeeded.map(|c| c.status), Some(ConditionStatus::True));
}

#[tokio::test]
async fn malformed_monitor_id_never_queries() {
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("typo", vec![Expectation::monitor("12a45", "Alert")]).await;

    let err = unwrap_err(h.drive(&key).await, "drive should fail");
    assert!(matches!(
        err,
        Error::Evaluation(EvaluationError::MalformedMonitorId { .. })
    ));
    assert_eq!(h.monitors.calls(), 0);
    assert_eq!(h.get(&key).await.status.phase, Phase::Failed);
}

#[tokio::test]
async fn vanished_job_fails_the_scenario() {
    let h = Harness::requeue(JobScript::running_forever());
    let key = h.create("ghost", alert_expectation()).await;
    unwrap_result(h.reconciler.reconcile(&key).await, "first pass");

    let job = h.get(&key).await.status.active_job.unwrap_or_default();
    h.substrate.remove_job(&ObjectKey::new("drills", job)).await;

    let err = unwrap_err(h.reconciler.reconcile(&key).await, "second pass");
    assert!(matches!(err, Error::JobVanished { .. }));
    assert_eq!(h.get(&key).await.status.phase, Phase::Failed);
    assert_eq!(h.substrate.create_calls(), 1);
}

// ==========================================================================
// FINALIZER PROTOCOL
// ==========================================================================

#[tokio::test]
async fn finalizer_runs_without_a_job() {
    // GIVEN: A scenario holding the finalizer that never ran a job
    let h = Harness::requeue(JobScript::running_forever());
    let mut scenario = Scenario::new("drills", "early-delete");
    scenario.metadata.add_finalizer(DEFAULT_FINALIZER);
    let key = unwrap_result(h.store.create(scenario).await, "create").metadata.key();

    // WHEN: Deletion is requested and the scenario reconciled
    unwrap_result(h.store.delete(&key).await, "delete");
    assert!(h.get(&key).await.metadata.is_being_deleted());
    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile");

    // THEN: Teardown was attempted, the finalizer released and the object purged
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::Finalized));
    assert_eq!(h.substrate.delete_calls(), 1);
    assert_eq!(h.substrate.create_calls(), 0);
    assert!(!h.store.contains(&key).await);
}

#[tokio::test]
async fn finalizer_tears_down_running_job() {
    let h = Harness::requeue(JobScript::running_forever());
    let key = h.create("mid-run", alert_expectation()).await;
    unwrap_result(h.reconciler.reconcile(&key).await, "first pass");
    assert_eq!(h.substrate.job_count().await, 1);

    unwrap_result(h.store.delete(&key).await, "delete");
    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "finalize");

    assert_eq!(outcome.step, ReconcileStep::Finalized);
    assert_eq!(h.substrate.job_count().await, 0);
    assert!(!h.store.contains(&key).await);

    let gone = unwrap_result(h.reconciler.reconcile(&key).await, "after purge");
    assert_eq!(gone, ReconcileOutcome::done(ReconcileStep::NotFound));
}

#[tokio::test]
async fn finalizer_ignores_cleanup_failures() {
    let h = Harness::requeue(JobScript::running_forever());
    let key = h.create("stuck-job", alert_expectation()).await;
    unwrap_result(h.reconciler.reconcile(&key).await, "first pass");

    h.substrate.fail_deletes(true);
    unwrap_result(h.store.delete(&key).await, "delete");
    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "finalize");

    assert_eq!(outcome.step, ReconcileStep::Finalized);
    assert!(!h.store.contains(&key).await);
}

// ==========================================================================
// CONFLICTS
// ==========================================================================

#[tokio::test]
async fn conflicts_within_budget_are_absorbed() {
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("contended", alert_expectation()).await;
    h.store.inject_conflicts(3);

    let outcome = unwrap_result(h.drive(&key).await, "drive should succeed");
    assert_eq!(outcome.step, ReconcileStep::Succeeded);
}

#[tokio::test]
async fn unsaved_success_keeps_the_job_for_the_next_pass() {
    // GIVEN: A scenario whose job completes and whose monitor matches
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("flaky-store", alert_expectation()).await;
    let first = unwrap_result(h.reconciler.reconcile(&key).await, "first pass");
    assert_eq!(first.step, ReconcileStep::JobSubmitted);

    // WHEN: Every attempt to store the outcome conflicts
    h.store.inject_conflicts(5);
    let err = unwrap_err(h.reconciler.reconcile(&key).await, "second pass");
    assert!(matches!(err, Error::RetryExhausted { attempts: 5, .. }));

    // THEN: The finished job is still there and nothing was recorded
    assert_eq!(h.substrate.job_count().await, 1);
    let scenario = h.get(&key).await;
    assert_ne!(scenario.status.phase, Phase::Failed);
    assert!(scenario.status.result.is_none());

    // AND: The next pass records the success and only then removes the job
    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "third pass");
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::Succeeded));
    let scenario = h.get(&key).await;
    assert_eq!(scenario.status.phase, Phase::Succeeded);
    assert!(scenario.status.condition(ConditionType::Failed).is_none());
    assert_eq!(h.substrate.job_count().await, 0);
    assert_eq!(h.substrate.create_calls(), 1);
}

#[tokio::test]
async fn unsaved_job_failure_is_not_reported_as_vanished() {
    // GIVEN: A scenario whose job fails
    let h = Harness::requeue(JobScript::fails_after(0));
    let key = h.create("flaky-failure", alert_expectation()).await;
    unwrap_result(h.reconciler.reconcile(&key).await, "first pass");

    // WHEN: Storing the failure runs out of retries
    h.store.inject_conflicts(5);
    let err = unwrap_err(h.reconciler.reconcile(&key).await, "second pass");
    assert!(matches!(err, Error::RetryExhausted { .. }));
    assert_eq!(h.substrate.job_count().await, 1);

    // THEN: The next pass records the job failure itself
    let err = unwrap_err(h.reconciler.reconcile(&key).await, "third pass");
    assert!(matches!(err, Error::JobFailed { .. }));
    let scenario = h.get(&key).await;
    let failed = scenario.status.condition(ConditionType::Failed);
    assert_eq!(failed.map(|c| c.reason.as_str()), Some("JobFailed"));
    assert_eq!(h.substrate.job_count().await, 0);
}

#[tokio::test]
async fn conflict_exhaustion_surfaces() {
    let h = Harness::requeue(JobScript::completes_after(0));
    let key = h.create("hot", alert_expectation()).await;
    h.store.inject_conflicts(100);

    let err = unwrap_err(h.reconciler.reconcile(&key).await, "reconcile should fail");
    assert!(matches!(err, Error::RetryExhausted { attempts: 5, .. }));
}

// ==========================================================================
// BLOCKING MODE AND POLICIES
// ==========================================================================

#[tokio::test]
async fn blocking_mode_runs_to_completion_in_one_pass() {
    let h = Harness::new(
        JobScript::completes_after(2),
        ReconcilerConfig::for_testing().with_wait_mode(JobWaitMode::Blocking),
    );
    let key = h.create("inline", alert_expectation()).await;

    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile");
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::Succeeded));
    assert_eq!(h.substrate.job_count().await, 0);

    let again = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile again");
    assert_eq!(again.step, ReconcileStep::AlreadySucceeded);
}

#[tokio::test]
async fn blocking_mode_leaves_existing_job_alone() {
    let h = Harness::new(
        JobScript::running_forever(),
        ReconcilerConfig::for_testing().with_wait_mode(JobWaitMode::Blocking),
    );
    let key = h.create("leftover", alert_expectation()).await;
    let descriptor = JobBuilder::for_scenario(&h.get(&key).await).build();
    h.substrate.insert_job(Job::new(descriptor)).await;

    let outcome = unwrap_result(h.reconciler.reconcile(&key).await, "reconcile");
    assert_eq!(outcome, ReconcileOutcome::done(ReconcileStep::JobAlreadyExists));
    assert_eq!(h.substrate.create_calls(), 0);
}

#[tokio::test]
async fn blocking_wait_is_cancellable() {
    let h = Harness::new(
        JobScript::running_forever(),
        ReconcilerConfig::for_testing().with_wait_mode(JobWaitMode::Blocking),
    );
    let key = h.create("endless", alert_expectation()).await;
    let (handle, signal) = cancel_pair();

    let reconciler = Arc::clone(&h.reconciler);
    let task_key = key.clone();
    let task =
        tokio::spawn(async move { reconciler.reconcile_with_cancel(&task_key, &signal).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();

    let result = unwrap_result(task.await, "task should join");
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(h.substrate.job_count().await, 0);
    assert_ne!(h.get(&key).await.status.phase, Phase::Failed);
}

#[tokio::test]
async fn first_matching_policy_skips_payloadless_expectations() {
    let h = Harness::new(
        JobScript::completes_after(0),
        ReconcilerConfig::for_testing().with_evaluation_policy(EvaluationPolicy::FirstMatching),
    );
    let key = h
        .create(
            "legacy",
            vec![Expectation::default(), Expectation::monitor("12345", "Alert")],
        )
        .await;

    let outcome = unwrap_result(h.drive(&key).await, "drive should succeed");
    assert_eq!(outcome.step, ReconcileStep::Succeeded);
}
