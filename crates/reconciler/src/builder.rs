//! Job descriptor builder.
//!
//! Pure and deterministic: the same scenario always yields the same
//! descriptor, including its name.

use std::collections::BTreeMap;

use scenarist_core::{
    ContainerSpec, JobDescriptor, ObjectMeta, RestartPolicy, Scenario, Template,
};
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_JOB_NAME_PREFIX;

/// Label naming the scenario that owns a job.
pub const SCENARIO_LABEL: &str = "scenarist.dev/scenario";
/// Label carrying the owning scenario's uid.
pub const SCENARIO_UID_LABEL: &str = "scenarist.dev/scenario-uid";

const MAX_NAME_LEN: usize = 63;
const SUFFIX_BYTES: usize = 4;

/// Builds the job descriptor for a scenario.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    namespace: String,
    prefix: String,
    owner: Option<ObjectMeta>,
    units: Vec<ContainerSpec>,
}

impl JobBuilder {
    /// Builder for a job in `namespace` with no units yet.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            prefix: DEFAULT_JOB_NAME_PREFIX.to_string(),
            owner: None,
            units: Vec::new(),
        }
    }

    /// Builder pre-filled from a scenario's identity and templates.
    pub fn for_scenario(scenario: &Scenario) -> Self {
        Self::new(scenario.metadata.namespace.clone())
            .with_owner(&scenario.metadata)
            .with_templates(&scenario.spec.templates)
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Derive the job name and labels from the owning scenario.
    #[must_use]
    pub fn with_owner(mut self, owner: &ObjectMeta) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    /// Append one executable unit per template, in order.
    #[must_use]
    pub fn with_templates(mut self, templates: &[Template]) -> Self {
        self.units.extend(templates.iter().map(unit_from_template));
        self
    }

    pub fn build(self) -> JobDescriptor {
        let (name, labels) = match &self.owner {
            Some(owner) => (derive_job_name(&self.prefix, owner), owner_labels(owner)),
            None => (format!("{}-job", self.prefix), BTreeMap::new()),
        };

        JobDescriptor {
            namespace: self.namespace,
            name,
            labels,
            units: self.units,
            restart_policy: RestartPolicy::Never,
            completions: 1,
            backoff_limit: 0,
        }
    }
}

fn unit_from_template(template: &Template) -> ContainerSpec {
    let mut unit = template.container_spec.clone();
    if unit.name.is_empty() {
        unit.name.clone_from(&template.name);
    }
    unit
}

fn owner_labels(owner: &ObjectMeta) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        SCENARIO_LABEL.to_string(),
        owner.name.chars().take(MAX_NAME_LEN).collect(),
    );
    if !owner.uid.is_empty() {
        labels.insert(SCENARIO_UID_LABEL.to_string(), owner.uid.clone());
    }
    labels
}

/// `{prefix}-{name}-{hash}`, at most 63 characters.
///
/// The hash covers the uid (or `namespace/name` when no uid is assigned), so
/// two scenarios never share a job even when their names collide after
/// truncation.
pub fn derive_job_name(prefix: &str, owner: &ObjectMeta) -> String {
    let seed = if owner.uid.is_empty() {
        format!("{}/{}", owner.namespace, owner.name)
    } else {
        owner.uid.clone()
    };
    let digest = Sha256::digest(seed.as_bytes());
    let suffix: String = digest
        .iter()
        .take(SUFFIX_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect();

    let budget = MAX_NAME_LEN
        .saturating_sub(prefix.len())
        .saturating_sub(suffix.len())
        .saturating_sub(2);
    let stem: String = owner
        .name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(budget)
        .collect();
    let stem = stem.trim_matches('-');

    if stem.is_empty() {
        format!("{prefix}-{suffix}")
    } else {
        format!("{prefix}-{stem}-{suffix}")
    }
}
