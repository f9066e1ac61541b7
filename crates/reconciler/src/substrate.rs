//! Execution substrate trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use scenarist_core::{
    ConditionStatus, DeletePropagation, Job, JobCondition, JobConditionType, JobDescriptor,
    JobTerminal, ObjectKey,
};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

const KIND: &str = "job";

/// The system that actually runs jobs.
#[async_trait]
pub trait JobSubstrate: Send + Sync {
    /// Fetch a job by key. A missing job is `Ok(None)`.
    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>>;

    /// Create a job. An existing job with the same key yields
    /// [`Error::AlreadyExists`].
    async fn create_job(&self, descriptor: &JobDescriptor) -> Result<Job>;

    /// Request deletion of a job and its owned units.
    async fn delete_job(&self, key: &ObjectKey, propagation: DeletePropagation) -> Result<()>;
}

/// How in-memory jobs progress as they are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobScript {
    /// Number of polls that still observe the job as running.
    pub running_polls: u32,
    /// Condition reported after that; `None` keeps the job running.
    pub outcome: Option<JobTerminal>,
}

impl JobScript {
    pub const fn running_forever() -> Self {
        Self {
            running_polls: 0,
            outcome: None,
        }
    }

    pub const fn completes_after(running_polls: u32) -> Self {
        Self {
            running_polls,
            outcome: Some(JobTerminal::Complete),
        }
    }

    pub const fn fails_after(running_polls: u32) -> Self {
        Self {
            running_polls,
            outcome: Some(JobTerminal::Failed),
        }
    }
}

struct TrackedJob {
    job: Job,
    polls: u32,
}

/// In-memory substrate for testing and simulation.
pub struct InMemoryJobSubstrate {
    jobs: RwLock<BTreeMap<ObjectKey, TrackedJob>>,
    script: JobScript,
    fail_deletes: AtomicBool,
    creates: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    propagations: RwLock<Vec<DeletePropagation>>,
}

impl InMemoryJobSubstrate {
    /// Substrate whose jobs stay running until told otherwise.
    pub fn new() -> Self {
        Self::with_script(JobScript::running_forever())
    }

    /// Substrate whose jobs follow `script`.
    pub fn with_script(script: JobScript) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            script,
            fail_deletes: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            propagations: RwLock::new(Vec::new()),
        }
    }

    /// Make every delete fail with a substrate error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Place a job directly, as if created by an earlier pass.
    pub async fn insert_job(&self, job: Job) {
        self.jobs
            .write()
            .await
            .insert(job.descriptor.key(), TrackedJob { job, polls: 0 });
    }

    /// Drop a job without going through `delete_job`.
    pub async fn remove_job(&self, key: &ObjectKey) {
        self.jobs.write().await.remove(key);
    }

    /// Append a `True` condition to a stored job.
    pub async fn set_condition(&self, key: &ObjectKey, condition_type: JobConditionType) {
        if let Some(tracked) = self.jobs.write().await.get_mut(key) {
            tracked
                .job
                .status
                .conditions
                .push(JobCondition::new(condition_type, ConditionStatus::True));
        }
    }

    pub async fn contains(&self, key: &ObjectKey) -> bool {
        self.jobs.read().await.contains_key(key)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Propagation policies of every delete request, in order.
    pub async fn delete_propagations(&self) -> Vec<DeletePropagation> {
        self.propagations.read().await.clone()
    }
}

impl Default for InMemoryJobSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

fn terminal_condition(outcome: JobTerminal) -> JobCondition {
    match outcome {
        JobTerminal::Complete => JobCondition::new(JobConditionType::Complete, ConditionStatus::True),
        JobTerminal::Failed => JobCondition::new(JobConditionType::Failed, ConditionStatus::True),
    }
}

#[async_trait]
impl JobSubstrate for InMemoryJobSubstrate {
    async fn get_job(&self, key: &ObjectKey) -> Result<Option<Job>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.write().await;
        let Some(tracked) = jobs.get_mut(key) else {
            return Ok(None);
        };

        tracked.polls = tracked.polls.saturating_add(1);
        if let Some(outcome) = self.script.outcome {
            if tracked.polls > self.script.running_polls && tracked.job.terminal().is_none() {
                tracked.job.status.conditions.push(terminal_condition(outcome));
            }
        }
        Ok(Some(tracked.job.clone()))
    }

    async fn create_job(&self, descriptor: &JobDescriptor) -> Result<Job> {
        let key = descriptor.key();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&key) {
            return Err(Error::already_exists(KIND, &key));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);

        let job = Job::new(descriptor.clone());
        jobs.insert(
            key,
            TrackedJob {
                job: job.clone(),
                polls: 0,
            },
        );
        Ok(job)
    }

    async fn delete_job(&self, key: &ObjectKey, propagation: DeletePropagation) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.propagations.write().await.push(propagation);

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::substrate("delete_job", "injected delete failure"));
        }
        self.jobs
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(KIND, key))
    }
}
