//! The Scenario resource: what to run and what to expect afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::meta::ObjectMeta;
use crate::status::ScenarioStatus;

/// A declarative scenario resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ScenarioSpec,
    #[serde(default)]
    pub status: ScenarioStatus,
}

impl Scenario {
    /// Create a scenario with empty spec and status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Self::default()
        }
    }

    /// Set the spec.
    #[must_use]
    pub fn with_spec(mut self, spec: ScenarioSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Parse a scenario manifest from YAML.
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| Error::yaml_parse_failed(e.to_string()))
    }

    /// Parse a scenario manifest from JSON.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| Error::json_parse_failed(e.to_string()))
    }

    /// Check the fields a manifest must carry before it can be submitted.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.trim().is_empty() {
            return Err(Error::invalid_record("metadata.name is empty"));
        }
        if let Some(template) = self.spec.templates.iter().find(|t| t.container_spec.image.is_empty()) {
            return Err(Error::invalid_record(format!(
                "template '{}' has no image",
                template.name
            )));
        }
        self.spec
            .expectations
            .iter()
            .try_for_each(|e| e.timeout().map(|_| ()))
    }
}

/// Desired state of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expectations: Vec<Expectation>,
}

impl ScenarioSpec {
    pub fn new(templates: Vec<Template>, expectations: Vec<Expectation>) -> Self {
        Self {
            templates,
            expectations,
        }
    }
}

/// One executable unit contributed to the scenario job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub name: String,
    pub container_spec: ContainerSpec,
}

impl Template {
    pub fn new(name: impl Into<String>, container_spec: ContainerSpec) -> Self {
        Self {
            name: name.into(),
            container_spec,
        }
    }
}

/// Opaque description of a container to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "ResourceRequirements::is_empty")]
    pub resources: ResourceRequirements,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_limit(mut self, resource: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.resources.limits.insert(resource.into(), quantity.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Resource limits and requests, keyed by resource name (`cpu`, `memory`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirements {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.requests.is_empty()
    }
}

/// A post-execution check.
///
/// At most one checker payload is set; [`Expectation::checker`] exposes it as
/// a tagged [`Checker`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_check: Option<MonitorCheck>,
}

impl Expectation {
    /// Expectation that a monitor reports `expected_state`.
    pub fn monitor(monitor_id: impl Into<String>, expected_state: impl Into<String>) -> Self {
        Self {
            timeout: None,
            monitor_check: Some(MonitorCheck {
                monitor_id: monitor_id.into(),
                expected_state: expected_state.into(),
            }),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// The populated checker payload, if any.
    pub fn checker(&self) -> Option<Checker> {
        self.monitor_check.clone().map(Checker::MonitorState)
    }

    /// Parsed timeout. `None` when unset or blank.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => crate::duration::parse(value).map(Some),
        }
    }
}

/// Compare an external monitor's overall state with an expected value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorCheck {
    #[serde(rename = "monitorID")]
    pub monitor_id: String,
    pub expected_state: String,
}

/// Tagged view over the checker payload of an expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checker {
    MonitorState(MonitorCheck),
}

impl Checker {
    pub const fn kind(&self) -> CheckerKind {
        match self {
            Self::MonitorState(_) => CheckerKind::MonitorState,
        }
    }
}

/// Registry key for checker implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckerKind {
    MonitorState,
}

impl CheckerKind {
    /// Manifest field that carries this payload.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MonitorState => "monitorCheck",
        }
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
