use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an action failed. Drives both in-line retry and quarantine retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rate limits, timeouts, flaky upstreams. The only kind retried in-line.
    Transient,
    Permission,
    Validation,
    Authentication,
    Configuration,
    IterationLimit,
    /// Performer errored without classifying the failure.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permission => "permission",
            FailureKind::Validation => "validation",
            FailureKind::Authentication => "authentication",
            FailureKind::Configuration => "configuration",
            FailureKind::IterationLimit => "iteration_limit",
            FailureKind::Internal => "internal",
        }
    }

    /// Whether a quarantined task failing this way gets its one scheduled retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::Internal)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one plan step after the executor gave up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("{action}: {kind} failure is not retried: {message}")]
    NonRetryable {
        action: String,
        kind: FailureKind,
        message: String,
    },
    #[error("{action}: gave up after {attempts} attempts: {message}")]
    Exhausted {
        action: String,
        attempts: u32,
        kind: FailureKind,
        message: String,
    },
    #[error("{action}: critical-risk task, not retried: {message}")]
    Critical {
        action: String,
        kind: FailureKind,
        message: String,
    },
}

impl StepError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StepError::NonRetryable { kind, .. }
            | StepError::Exhausted { kind, .. }
            | StepError::Critical { kind, .. } => *kind,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            StepError::Exhausted { attempts, .. } => *attempts,
            StepError::NonRetryable { .. } | StepError::Critical { .. } => 1,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::NonRetryable { message, .. }
            | StepError::Exhausted { message, .. }
            | StepError::Critical { message, .. } => message,
        }
    }
}
