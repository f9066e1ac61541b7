//! CLI command handlers.
//!
//! All commands follow the same shape:
//! - Zero unwraps, zero panics
//! - Errors carry context for the operator

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use scenarist_core::{Expectation, JobDescriptor, ObjectKey, Scenario};
use scenarist_reconciler::{
    CheckerRegistry, DatadogClient, DatadogConfig, ExpectationEvaluator, InMemoryJobSubstrate,
    InMemoryScenarioStore, JobBuilder, JobScript, ReconcileOutcome, ReconcilerConfig, Requeue,
    ScenarioReconciler, ScenarioStore, StaticMonitorClient,
};
use tracing::{debug, info, warn};

use crate::cli::{Commands, SimulatedOutcome};

/// Poll interval used by `simulate` when no config file is given.
const SIMULATION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Render { file, config } => cmd_render(&file, config.as_deref()),

        Commands::Check {
            monitor_id,
            expect,
            timeout,
        } => cmd_check(monitor_id, expect, timeout).await,

        Commands::Simulate {
            file,
            config,
            outcome,
            running_polls,
            monitor_state,
            delete,
        } => {
            cmd_simulate(SimulateOptions {
                file,
                config,
                outcome,
                running_polls,
                monitor_state,
                delete,
            })
            .await
        }
    }
}

fn cmd_render(file: &Path, config: Option<&Path>) -> Result<()> {
    let scenario = load_scenario(file)?;
    let config = load_config(config, ReconcilerConfig::default())?;
    let descriptor = render(&scenario, &config);

    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

async fn cmd_check(monitor_id: String, expect: String, timeout: String) -> Result<()> {
    let datadog = DatadogConfig::from_env().context("Datadog credentials are not configured")?;
    let client = DatadogClient::new(datadog).context("failed to build Datadog client")?;
    let evaluator =
        ExpectationEvaluator::new(CheckerRegistry::with_monitor_client(Arc::new(client)));

    let expectation = Expectation::monitor(monitor_id, expect).with_timeout(timeout);
    let result = evaluator
        .evaluate(std::slice::from_ref(&expectation))
        .await
        .context("monitor check could not run")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(failure) = result.failed_expectations.first() {
        bail!("{}", failure.reason);
    }
    Ok(())
}

struct SimulateOptions {
    file: PathBuf,
    config: Option<PathBuf>,
    outcome: SimulatedOutcome,
    running_polls: u32,
    monitor_state: String,
    delete: bool,
}

async fn cmd_simulate(opts: SimulateOptions) -> Result<()> {
    let scenario = load_scenario(&opts.file)?;
    let config = load_config(
        opts.config.as_deref(),
        ReconcilerConfig::default().with_poll_interval(SIMULATION_POLL_INTERVAL),
    )?;

    let script = match opts.outcome {
        SimulatedOutcome::Complete => JobScript::completes_after(opts.running_polls),
        SimulatedOutcome::Fail => JobScript::fails_after(opts.running_polls),
    };
    let monitors = StaticMonitorClient::from_states(
        monitor_ids(&scenario).into_iter().map(|id| (id, opts.monitor_state.clone())),
    );

    let store = Arc::new(InMemoryScenarioStore::new());
    let key = store
        .create(scenario)
        .await
        .context("failed to store scenario")?
        .metadata
        .key();

    let reconciler = ScenarioReconciler::builder()
        .with_store(Arc::clone(&store) as Arc<dyn ScenarioStore>)
        .with_substrate(Arc::new(InMemoryJobSubstrate::with_script(script)))
        .with_monitor_client(Arc::new(monitors))
        .with_config(config)
        .build()
        .context("failed to build reconciler")?;

    let outcome = drive(&reconciler, &key).await;
    match &outcome {
        Ok(o) => info!(scenario = %key, step = %o.step, "Reconcile finished"),
        Err(e) => warn!(scenario = %key, error = %e, "Reconcile failed"),
    }

    let current = store.get(&key).await.context("scenario vanished")?;
    println!("{}", serde_json::to_string_pretty(&current.status)?);

    if opts.delete {
        store.delete(&key).await.context("failed to request deletion")?;
        let finalized = drive(&reconciler, &key)
            .await
            .context("finalization failed")?;
        info!(scenario = %key, step = %finalized.step, purged = !store.contains(&key).await, "Deletion handled");
    }

    outcome.map(|_| ()).context("scenario did not succeed")
}

/// Reconcile until no requeue is requested, sleeping in between.
async fn drive(
    reconciler: &ScenarioReconciler,
    key: &ObjectKey,
) -> scenarist_reconciler::Result<ReconcileOutcome> {
    loop {
        let outcome = reconciler.reconcile(key).await?;
        match outcome.requeue {
            Requeue::Never => return Ok(outcome),
            Requeue::After(delay) => {
                debug!(step = %outcome.step, ?delay, "Requeue requested");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let mut scenario = if is_json {
        Scenario::from_json(&contents)
    } else {
        Scenario::from_yaml(&contents)
    }
    .with_context(|| format!("failed to parse {}", path.display()))?;

    if scenario.metadata.namespace.is_empty() {
        scenario.metadata.namespace = "default".to_string();
    }
    scenario
        .validate()
        .with_context(|| format!("invalid scenario in {}", path.display()))?;
    Ok(scenario)
}

fn load_config(path: Option<&Path>, fallback: ReconcilerConfig) -> Result<ReconcilerConfig> {
    match path {
        Some(path) => ReconcilerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(fallback),
    }
}

fn render(scenario: &Scenario, config: &ReconcilerConfig) -> JobDescriptor {
    JobBuilder::for_scenario(scenario)
        .with_prefix(&config.job_name_prefix)
        .build()
}

/// Numeric monitor IDs referenced by a scenario's expectations.
fn monitor_ids(scenario: &Scenario) -> Vec<i64> {
    scenario
        .spec
        .expectations
        .iter()
        .filter_map(|e| e.monitor_check.as_ref())
        .filter_map(|check| check.monitor_id.trim().parse().ok())
        .collect()
}
