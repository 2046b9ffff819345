//! The tagged result of running a single step, and the persisted status
//! vocabulary the durability layer derives from it.

use serde::{Deserialize, Serialize};

use crate::workflow::step::State;

/// What a step produced. Every variant carries the state map that goes with
/// it: for `Waiting`/`Failed` that is the error state (`class`, `error`,
/// `traceback`), for everything else it is the process state proper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "state", rename_all = "snake_case")]
pub enum Outcome {
    /// The step ran and produced a new state; the process continues.
    Success(State),
    /// A `conditional` gate was closed; state passes through unchanged.
    Skipped(State),
    /// An input step is waiting on a user-submitted form.
    Suspend(State),
    /// A retry step raised an unclassified error; retry by resuming.
    Waiting(State),
    /// A step raised an error that will not resolve itself.
    Failed(State),
    /// The process was aborted by a user.
    Abort(State),
    /// The process reached its `done` step.
    Complete(State),
}

impl Outcome {
    pub fn state(&self) -> &State {
        match self {
            Outcome::Success(s)
            | Outcome::Skipped(s)
            | Outcome::Suspend(s)
            | Outcome::Waiting(s)
            | Outcome::Failed(s)
            | Outcome::Abort(s)
            | Outcome::Complete(s) => s,
        }
    }

    pub fn into_state(self) -> State {
        match self {
            Outcome::Success(s)
            | Outcome::Skipped(s)
            | Outcome::Suspend(s)
            | Outcome::Waiting(s)
            | Outcome::Failed(s)
            | Outcome::Abort(s)
            | Outcome::Complete(s) => s,
        }
    }

    /// Apply `f` to the carried state without changing the variant.
    pub(crate) fn map_state(self, f: impl FnOnce(State) -> State) -> Outcome {
        match self {
            Outcome::Success(s) => Outcome::Success(f(s)),
            Outcome::Skipped(s) => Outcome::Skipped(f(s)),
            Outcome::Suspend(s) => Outcome::Suspend(f(s)),
            Outcome::Waiting(s) => Outcome::Waiting(f(s)),
            Outcome::Failed(s) => Outcome::Failed(f(s)),
            Outcome::Abort(s) => Outcome::Abort(f(s)),
            Outcome::Complete(s) => Outcome::Complete(f(s)),
        }
    }

    /// Whether `runwf` should advance to the next step after this outcome
    /// has been logged. Only a plain success or a skipped gate continues;
    /// every other variant parks or ends the process.
    pub fn is_continuable(&self) -> bool {
        matches!(self, Outcome::Success(_) | Outcome::Skipped(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Outcome::Suspend(_))
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Outcome::Waiting(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Abort(_))
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete(_))
    }
}

/// The persisted status of a single process step row. A direct tag-only
/// projection of [`Outcome`], kept separate because the row format is a
/// storage concern and the outcome is a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Skipped,
    Suspend,
    Waiting,
    Failed,
    Abort,
    Complete,
}

impl From<&Outcome> for StepStatus {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success(_) => StepStatus::Success,
            Outcome::Skipped(_) => StepStatus::Skipped,
            Outcome::Suspend(_) => StepStatus::Suspend,
            Outcome::Waiting(_) => StepStatus::Waiting,
            Outcome::Failed(_) => StepStatus::Failed,
            Outcome::Abort(_) => StepStatus::Abort,
            Outcome::Complete(_) => StepStatus::Complete,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Success => "success",
            StepStatus::Skipped => "skipped",
            StepStatus::Suspend => "suspend",
            StepStatus::Waiting => "waiting",
            StepStatus::Failed => "failed",
            StepStatus::Abort => "abort",
            StepStatus::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// The persisted status of a process as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Created,
    Running,
    Suspended,
    Resumed,
    Waiting,
    Failed,
    InconsistentData,
    ApiUnavailable,
    Aborted,
    Completed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Created => "created",
            ProcessStatus::Running => "running",
            ProcessStatus::Suspended => "suspended",
            ProcessStatus::Resumed => "resumed",
            ProcessStatus::Waiting => "waiting",
            ProcessStatus::Failed => "failed",
            ProcessStatus::InconsistentData => "inconsistent_data",
            ProcessStatus::ApiUnavailable => "api_unavailable",
            ProcessStatus::Aborted => "aborted",
            ProcessStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}
