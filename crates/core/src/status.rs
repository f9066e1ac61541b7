//! Observed state of a scenario: conditions, phase, and expectation results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scenario::Expectation;

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition vocabulary. Each type also names the phase it projects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Progressing,
    Succeeded,
    Failed,
    Degraded,
}

impl ConditionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Progressing => "Progressing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse lifecycle phase, projected from the latest applied condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Unknown,
    Progressing,
    Available,
    Succeeded,
    Failed,
    Degraded,
}

impl From<ConditionType> for Phase {
    fn from(value: ConditionType) -> Self {
        match value {
            ConditionType::Available => Self::Available,
            ConditionType::Progressing => Self::Progressing,
            ConditionType::Succeeded => Self::Succeeded,
            ConditionType::Failed => Self::Failed,
            ConditionType::Degraded => Self::Degraded,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Progressing => "Progressing",
            Self::Available => "Available",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Degraded => "Degraded",
        };
        f.write_str(s)
    }
}

/// A single status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Observed state of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExpectationResult>,
    /// Spec generation the last recorded outcome belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Job submitted by an earlier pass and not yet finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job: Option<String>,
}

impl ScenarioStatus {
    /// Apply a condition with replace-by-type semantics and project the phase.
    ///
    /// An existing condition keeps its position; its transition time only
    /// moves when the status value changes. The phase stays `Succeeded` while
    /// the outcome still belongs to `generation`.
    pub fn set_condition(&mut self, condition: Condition, generation: i64) {
        let phase = Phase::from(condition.condition_type);

        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.status = condition.status;
                    existing.last_transition_time = condition.last_transition_time;
                }
                existing.reason = condition.reason;
                existing.message = condition.message;
            }
            None => self.conditions.push(condition),
        }

        if !self.is_succeeded_for(generation) {
            self.phase = phase;
        }
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Whether a terminal success was recorded for `generation`.
    pub fn is_succeeded_for(&self, generation: i64) -> bool {
        self.phase == Phase::Succeeded && self.observed_generation == Some(generation)
    }

    /// Whether a failure was recorded for `generation`.
    pub fn is_failed_for(&self, generation: i64) -> bool {
        self.phase == Phase::Failed && self.observed_generation == Some(generation)
    }
}

/// Outcome of evaluating a scenario's expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationResult {
    pub passed: bool,
    #[serde(with = "crate::duration::serde_humantime")]
    pub duration: Duration,
    #[serde(default)]
    pub succeeded_expectations: Vec<Expectation>,
    #[serde(default)]
    pub failed_expectations: Vec<FailedExpectation>,
}

impl ExpectationResult {
    /// Build a result; `passed` is derived from the failures.
    pub fn new(
        duration: Duration,
        succeeded_expectations: Vec<Expectation>,
        failed_expectations: Vec<FailedExpectation>,
    ) -> Self {
        Self {
            passed: failed_expectations.is_empty(),
            duration,
            succeeded_expectations,
            failed_expectations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExpectation {
    pub expectation: Expectation,
    pub reason: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn cond(t: ConditionType, s: ConditionStatus, msg: &str) -> Condition {
        Condition::new(t, s, "Test", msg)
    }

    #[test]
    fn test_set_condition_appends_and_projects_phase() {
        let mut status = ScenarioStatus::default();
        status.set_condition(cond(ConditionType::Progressing, ConditionStatus::Unknown, "start"), 1);
        status.set_condition(cond(ConditionType::Succeeded, ConditionStatus::True, "done"), 1);

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[1].condition_type, ConditionType::Succeeded);
        assert_eq!(status.phase, Phase::Succeeded);
    }

    #[test]
    fn test_set_condition_replaces_in_place() {
        let mut status = ScenarioStatus::default();
        status.set_condition(cond(ConditionType::Progressing, ConditionStatus::Unknown, "a"), 1);
        status.set_condition(cond(ConditionType::Failed, ConditionStatus::True, "b"), 1);
        let first_transition = status.conditions[0].last_transition_time;

        status.set_condition(cond(ConditionType::Progressing, ConditionStatus::Unknown, "c"), 1);

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].message, "c");
        assert_eq!(status.conditions[0].last_transition_time, first_transition);
        assert_eq!(status.phase, Phase::Progressing);
    }

    #[test]
    fn test_transition_time_moves_on_status_change() {
        let mut status = ScenarioStatus::default();
        let mut first = cond(ConditionType::Available, ConditionStatus::Unknown, "a");
        first.last_transition_time = DateTime::<Utc>::MIN_UTC;
        status.set_condition(first, 1);
        status.set_condition(cond(ConditionType::Available, ConditionStatus::True, "b"), 1);

        assert_ne!(status.conditions[0].last_transition_time, DateTime::<Utc>::MIN_UTC);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_phase_does_not_regress_from_succeeded() {
        let mut status = ScenarioStatus::default();
        status.set_condition(cond(ConditionType::Succeeded, ConditionStatus::True, "ok"), 3);
        status.observed_generation = Some(3);

        status.set_condition(cond(ConditionType::Available, ConditionStatus::Unknown, "fin"), 3);
        assert_eq!(status.phase, Phase::Succeeded);
        assert!(status.condition(ConditionType::Available).is_some());

        // A spec change releases the phase.
        status.set_condition(cond(ConditionType::Progressing, ConditionStatus::True, "rerun"), 4);
        assert_eq!(status.phase, Phase::Progressing);
    }

    #[test]
    fn test_expectation_result_duration_serializes_as_text() {
        let result = ExpectationResult::new(Duration::from_secs(90), vec![], vec![]);
        let json = serde_json::to_value(&result).unwrap();
        assert!(result.passed);
        assert_eq!(json["duration"], "1m 30s");
    }
}
