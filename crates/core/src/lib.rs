//! Core types for scenarist.
//!
//! - **Scenario**: the declarative resource (templates + expectations)
//! - **Status**: conditions, phase projection, expectation results
//! - **Job**: the descriptor submitted to the execution substrate and the
//!   job view it reports back
//!
//! Nothing here performs I/O.

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod duration;
pub mod error;
pub mod job;
pub mod meta;
pub mod scenario;
pub mod status;

pub use error::{Error, Result};
pub use job::{
    DeletePropagation, Job, JobCondition, JobConditionType, JobDescriptor, JobStatus, JobTerminal,
    RestartPolicy,
};
pub use meta::{ObjectKey, ObjectMeta};
pub use scenario::{
    Checker, CheckerKind, ContainerSpec, EnvVar, Expectation, MonitorCheck, ResourceRequirements,
    Scenario, ScenarioSpec, Template,
};
pub use status::{
    Condition, ConditionStatus, ConditionType, ExpectationResult, FailedExpectation, Phase,
    ScenarioStatus,
};
