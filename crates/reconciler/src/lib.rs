//! K8s-style reconciliation loop for scenario execution.
//!
//! A *scenario* declares task templates to run once and expectations to
//! check afterwards. The reconciler drives each scenario through:
//!
//! 1. Initialising its status and attaching a finalizer
//! 2. Building a job from the templates and submitting it
//! 3. Waiting for the job to reach a terminal condition
//! 4. Evaluating the expectations against live monitors
//! 5. Recording the outcome as status conditions and a result
//!
//! Deletion is gated by the finalizer: the owned job is torn down before the
//! finalizer is released.
//!
//! # Collaborators
//!
//! - [`ScenarioStore`] - persistence with optimistic concurrency
//! - [`JobSubstrate`] - the system that runs jobs
//! - [`MonitorClient`] - answers "what state is monitor N in?"
//!
//! In-memory implementations of each ship with the crate.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scenarist_core::Scenario;
//! use scenarist_reconciler::{
//!     InMemoryJobSubstrate, InMemoryScenarioStore, ReconcilerConfig, Requeue,
//!     ScenarioReconciler, ScenarioStore, StaticMonitorClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> scenarist_reconciler::Result<()> {
//!     let store = Arc::new(InMemoryScenarioStore::new());
//!     let key = store.create(Scenario::new("default", "demo")).await?.metadata.key();
//!
//!     let reconciler = ScenarioReconciler::builder()
//!         .with_store(store)
//!         .with_substrate(Arc::new(InMemoryJobSubstrate::new()))
//!         .with_monitor_client(Arc::new(StaticMonitorClient::with_state(1, "OK")))
//!         .with_config(ReconcilerConfig::default())
//!         .build()?;
//!
//!     while let Requeue::After(delay) = reconciler.reconcile(&key).await?.requeue {
//!         tokio::time::sleep(delay).await;
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod builder;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod monitor;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod substrate;
pub mod types;

// Re-export main types
pub use builder::{derive_job_name, JobBuilder};
pub use config::{JobWaitMode, ReconcilerConfig, DEFAULT_FINALIZER, DEFAULT_JOB_NAME_PREFIX};
pub use error::{Error, EvaluationError, Result};
pub use evaluator::{
    CheckVerdict, CheckerRegistry, EvaluationPolicy, ExpectationChecker, ExpectationEvaluator,
    MonitorStateChecker,
};
pub use executor::{cancel_pair, CancelHandle, CancelSignal, JobExecutor, JobProgress, Submission};
pub use monitor::{DatadogClient, DatadogConfig, MonitorClient, MonitorError, StaticMonitorClient};
pub use reconciler::{ScenarioReconciler, ScenarioReconcilerBuilder};
pub use retry::RetryPolicy;
pub use store::{InMemoryScenarioStore, ScenarioStore};
pub use substrate::{InMemoryJobSubstrate, JobScript, JobSubstrate};
pub use types::{ReconcileOutcome, ReconcileStep, Requeue};
