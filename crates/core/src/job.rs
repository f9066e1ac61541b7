//! Job descriptors handed to the execution substrate, and the job view it
//! reports back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::ObjectKey;
use crate::scenario::ContainerSpec;
use crate::status::ConditionStatus;

/// Restart policy for a job's executable units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Never,
}

/// Everything the substrate needs to run a scenario once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub units: Vec<ContainerSpec>,
    pub restart_policy: RestartPolicy,
    pub completions: u32,
    pub backoff_limit: u32,
}

impl JobDescriptor {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Condition types a job reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobConditionType {
    Complete,
    Failed,
    Suspended,
    FailureTarget,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub condition_type: JobConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl JobCondition {
    pub fn new(condition_type: JobConditionType, status: ConditionStatus) -> Self {
        Self {
            condition_type,
            status,
            reason: String::new(),
            message: String::new(),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTerminal {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
}

/// A job as the substrate currently reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub descriptor: JobDescriptor,
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            status: JobStatus::default(),
        }
    }

    /// First `Complete` or `Failed` condition that is `True`, if any.
    ///
    /// Every other condition means the job is still running.
    pub fn terminal(&self) -> Option<JobTerminal> {
        self.status
            .conditions
            .iter()
            .filter(|c| c.status == ConditionStatus::True)
            .find_map(|c| match c.condition_type {
                JobConditionType::Complete => Some(JobTerminal::Complete),
                JobConditionType::Failed => Some(JobTerminal::Failed),
                _ => None,
            })
    }
}

/// How owned objects are removed when a job is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePropagation {
    /// Delete returns at once; owned units are torn down asynchronously.
    #[default]
    Background,
}
