//! Outcome types returned by a reconcile pass.

use std::fmt;
use std::time::Duration;

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    /// The scenario no longer exists.
    NotFound,
    /// Finalization ran and the finalizer was released.
    Finalized,
    /// A successful outcome is already recorded.
    AlreadySucceeded,
    /// A failure is already recorded for the current spec generation.
    AlreadyFailed,
    /// Blocking mode found the job from an earlier pass and left it alone.
    JobAlreadyExists,
    /// The job was submitted; the outcome is pending.
    JobSubmitted,
    /// The job exists and has not reached a terminal condition.
    JobRunning,
    /// The job completed and every expectation held.
    Succeeded,
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::Finalized => "finalized",
            Self::AlreadySucceeded => "already-succeeded",
            Self::AlreadyFailed => "already-failed",
            Self::JobAlreadyExists => "job-already-exists",
            Self::JobSubmitted => "job-submitted",
            Self::JobRunning => "job-running",
            Self::Succeeded => "succeeded",
        };
        f.write_str(s)
    }
}

/// Instruction to the dispatcher about re-invoking `reconcile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Never,
    After(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub step: ReconcileStep,
    pub requeue: Requeue,
}

impl ReconcileOutcome {
    /// Outcome that needs no further passes.
    pub const fn done(step: ReconcileStep) -> Self {
        Self {
            step,
            requeue: Requeue::Never,
        }
    }

    pub const fn requeue_after(step: ReconcileStep, delay: Duration) -> Self {
        Self {
            step,
            requeue: Requeue::After(delay),
        }
    }

    pub const fn is_requeue(&self) -> bool {
        matches!(self.requeue, Requeue::After(_))
    }
}
