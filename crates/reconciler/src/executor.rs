//! Job submission, observation and cleanup.

use std::sync::Arc;
use std::time::Duration;

use scenarist_core::{DeletePropagation, Job, JobDescriptor, JobTerminal};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::substrate::JobSubstrate;

/// Create a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelSignal {
            rx,
            _keepalive: None,
        },
    )
}

/// Requests cancellation of in-flight waits.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by blocking waits; resolves once the paired handle cancels.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancelled. Pends forever if the handle is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Result of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Created,
    AlreadyExists,
}

/// Non-failing state of a job at one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    Running,
    Complete,
}

/// Drives a job through the substrate.
#[derive(Clone)]
pub struct JobExecutor {
    substrate: Arc<dyn JobSubstrate>,
    poll_interval: Duration,
}

impl JobExecutor {
    pub fn new(substrate: Arc<dyn JobSubstrate>, poll_interval: Duration) -> Self {
        Self {
            substrate,
            poll_interval,
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub async fn find(&self, descriptor: &JobDescriptor) -> Result<Option<Job>> {
        self.substrate.get_job(&descriptor.key()).await
    }

    /// Create the job unless one with the same name already exists.
    pub async fn submit(&self, descriptor: &JobDescriptor) -> Result<Submission> {
        let key = descriptor.key();
        if self.substrate.get_job(&key).await?.is_some() {
            debug!(job = %key, "Job already exists, not submitting");
            return Ok(Submission::AlreadyExists);
        }

        match self.substrate.create_job(descriptor).await {
            Ok(_) => {
                info!(job = %key, units = descriptor.units.len(), "Submitted job");
                Ok(Submission::Created)
            }
            Err(Error::AlreadyExists { .. }) => Ok(Submission::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    /// Poll the job once.
    pub async fn observe(&self, descriptor: &JobDescriptor) -> Result<JobProgress> {
        let key = descriptor.key();
        let job = self
            .substrate
            .get_job(&key)
            .await?
            .ok_or_else(|| Error::job_vanished(&descriptor.name))?;

        match job.terminal() {
            Some(JobTerminal::Complete) => Ok(JobProgress::Complete),
            Some(JobTerminal::Failed) => Err(Error::job_failed(&descriptor.name)),
            None => Ok(JobProgress::Running),
        }
    }

    /// Submit if absent, then poll every `poll_interval` until terminal.
    pub async fn execute(&self, descriptor: &JobDescriptor, cancel: &CancelSignal) -> Result<()> {
        self.submit(descriptor).await?;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.observe(descriptor).await? {
                JobProgress::Complete => {
                    info!(job = %descriptor.key(), "Job completed");
                    return Ok(());
                }
                JobProgress::Running => {
                    debug!(job = %descriptor.key(), interval = ?self.poll_interval, "Job still running");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Best-effort delete. Failures are logged, never returned.
    pub async fn cleanup(&self, descriptor: &JobDescriptor) {
        let key = descriptor.key();
        match self
            .substrate
            .delete_job(&key, DeletePropagation::Background)
            .await
        {
            Ok(()) => debug!(job = %key, "Deleted job"),
            Err(e) if e.is_not_found() => debug!(job = %key, "Job already gone"),
            Err(e) => warn!(job = %key, error = %e, "Failed to delete job"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use scenarist_core::RestartPolicy;

    use super::*;
    use crate::substrate::{InMemoryJobSubstrate, JobScript};

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            namespace: "drills".into(),
            name: "scenario-recon-1a2b3c4d".into(),
            labels: BTreeMap::new(),
            units: vec![],
            restart_policy: RestartPolicy::Never,
            completions: 1,
            backoff_limit: 0,
        }
    }

    fn executor(substrate: &Arc<InMemoryJobSubstrate>) -> JobExecutor {
        JobExecutor::new(
            Arc::clone(substrate) as Arc<dyn JobSubstrate>,
            Duration::from_millis(2),
        )
    }

    #[tokio::test]
    async fn test_execute_until_complete() {
        let substrate = Arc::new(InMemoryJobSubstrate::with_script(JobScript::completes_after(2)));
        let exec = executor(&substrate);

        exec.execute(&descriptor(), &CancelSignal::never()).await.unwrap();

        // One existence check on submit, then one poll per tick.
        assert_eq!(substrate.get_calls(), 4);
        assert_eq!(substrate.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_execute_reports_failure() {
        let substrate = Arc::new(InMemoryJobSubstrate::with_script(JobScript::fails_after(0)));
        let err = executor(&substrate)
            .execute(&descriptor(), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "scenario job is failed");
    }

    #[tokio::test]
    async fn test_execute_is_cancellable() {
        let substrate = Arc::new(InMemoryJobSubstrate::new());
        let exec = executor(&substrate);
        let (handle, signal) = cancel_pair();

        let task = tokio::spawn(async move { exec.execute(&descriptor(), &signal).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_submit_at_most_once() {
        let substrate = Arc::new(InMemoryJobSubstrate::new());
        let exec = executor(&substrate);

        assert_eq!(exec.submit(&descriptor()).await.unwrap(), Submission::Created);
        assert_eq!(exec.submit(&descriptor()).await.unwrap(), Submission::AlreadyExists);
        assert_eq!(substrate.create_calls(), 1);
        assert_eq!(substrate.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_observe_missing_job_is_vanished() {
        let substrate = Arc::new(InMemoryJobSubstrate::new());
        let err = executor(&substrate).observe(&descriptor()).await.unwrap_err();
        assert!(matches!(err, Error::JobVanished { .. }));
    }

    #[tokio::test]
    async fn test_observe_running_without_conditions() {
        let substrate = Arc::new(InMemoryJobSubstrate::new());
        let exec = executor(&substrate);
        exec.submit(&descriptor()).await.unwrap();
        assert_eq!(exec.observe(&descriptor()).await.unwrap(), JobProgress::Running);
    }

    #[tokio::test]
    async fn test_cleanup_swallows_errors() {
        let substrate = Arc::new(InMemoryJobSubstrate::new());
        let exec = executor(&substrate);

        // Nothing to delete.
        exec.cleanup(&descriptor()).await;

        exec.submit(&descriptor()).await.unwrap();
        substrate.fail_deletes(true);
        exec.cleanup(&descriptor()).await;

        assert_eq!(substrate.delete_calls(), 2);
        assert!(substrate.contains(&descriptor().key()).await);
        assert_eq!(
            substrate.delete_propagations().await,
            vec![DeletePropagation::Background; 2]
        );
    }
}
