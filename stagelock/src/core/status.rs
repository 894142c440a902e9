//! Stage outcome and failure reason enums.

use crate::errors::{
    ContractViolationError, MissingInput, MissingInputError, StageExecutionError, StagelockError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The command exited with a nonzero status (or was killed by a signal).
    NonZeroExit {
        /// Exit code, absent when terminated by a signal.
        exit_code: Option<i32>,
    },
    /// The command ran longer than the stage timeout and was killed.
    TimedOut {
        /// The timeout in seconds.
        timeout_secs: u64,
    },
    /// The command could not be started.
    LaunchFailed {
        /// The launch error.
        message: String,
    },
    /// The command succeeded but declared outputs are absent.
    ContractViolation {
        /// Outputs missing after execution.
        missing_outputs: Vec<String>,
    },
    /// An input was missing when the stage was about to run.
    MissingInput {
        /// The missing input.
        input: MissingInput,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { exit_code: Some(code) } => write!(f, "command exited with status {code}"),
            Self::NonZeroExit { exit_code: None } => write!(f, "command terminated by signal"),
            Self::TimedOut { timeout_secs } => write!(f, "command timed out after {timeout_secs}s"),
            Self::LaunchFailed { message } => write!(f, "command could not be started: {message}"),
            Self::ContractViolation { missing_outputs } => {
                write!(f, "declared outputs not produced: {}", missing_outputs.join(", "))
            }
            Self::MissingInput { input } => write!(f, "{input}"),
        }
    }
}

impl FailureReason {
    /// Converts the reason into the matching error for `stage`.
    #[must_use]
    pub fn into_error(self, stage: &str) -> StagelockError {
        match self {
            Self::NonZeroExit { exit_code } => {
                let reason = Self::NonZeroExit { exit_code }.to_string();
                StageExecutionError::new(stage, reason, exit_code).into()
            }
            Self::TimedOut { .. } | Self::LaunchFailed { .. } => {
                StageExecutionError::new(stage, self.to_string(), None).into()
            }
            Self::ContractViolation { missing_outputs } => {
                ContractViolationError::new(stage, missing_outputs).into()
            }
            Self::MissingInput { input } => MissingInputError {
                stage: stage.to_string(),
                input,
            }
            .into(),
        }
    }
}

/// What happened to a stage during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage was up to date and not in the plan.
    Skipped,
    /// The stage ran and its new state was recorded.
    Succeeded,
    /// The stage ran and failed.
    Failed {
        /// Why it failed.
        reason: FailureReason,
    },
    /// The stage was planned but an earlier stage failed first.
    NotAttempted,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            Self::NotAttempted => write!(f, "not attempted"),
        }
    }
}

impl StageOutcome {
    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if the stage ran to completion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}
