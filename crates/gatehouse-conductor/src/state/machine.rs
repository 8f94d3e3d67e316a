use anyhow::{bail, Result};
use gatehouse_core::{Classification, Plan, StepStatus};
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalStatus;
use crate::failure::FailureKind;

// ── Status enums ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    Running,
    AwaitingApproval,
    Completed,
    Rejected,
    TimedOut,
    Quarantined,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Rejected | RunStatus::TimedOut | RunStatus::Quarantined
        )
    }
}

// ── State types ──

/// Durable state of one task run at `Logs/runs/<task_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub task_id: String,
    pub content_hash: String,
    /// File name the task document arrived with.
    pub source_file: String,
    pub status: RunStatus,
    pub created_at: String,
    pub updated_at: String,
    pub classification: Classification,
    pub plan: Plan,
    pub progress: Vec<StepProgress>,
    /// Step executions in the current run; reset when a retry is released.
    #[serde(default)]
    pub iterations: u32,
    /// Whether the one scheduled retry has been used.
    #[serde(default)]
    pub retried: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,
    #[serde(default)]
    pub version: u32,
}

/// Per-step bookkeeping alongside the plan's step status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepProgress {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    pub timestamp: String,
}

// ── Valid transitions ──

const VALID_TRANSITIONS: &[(StepStatus, &[StepStatus])] = &[
    (
        StepStatus::Pending,
        &[StepStatus::InProgress, StepStatus::Skipped],
    ),
    (
        StepStatus::InProgress,
        &[
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Pending, // interrupted by a crash
        ],
    ),
    (StepStatus::Failed, &[StepStatus::Pending]), // scheduled retry
                                                  // Completed and Skipped are terminal
];

fn is_valid_transition(from: StepStatus, to: StepStatus) -> bool {
    VALID_TRANSITIONS
        .iter()
        .any(|(f, targets)| *f == from && targets.contains(&to))
}

// ── Side effects ──

/// Optional side-effect data applied during a transition.
#[derive(Debug, Clone, Default)]
pub struct StepUpdate {
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub attempts: Option<u32>,
    pub error: Option<StepFailure>,
    pub skip_reason: Option<String>,
}

impl StepUpdate {
    pub fn apply(self, progress: &mut StepProgress) {
        if let Some(v) = self.started_at {
            progress.started_at = Some(v);
        }
        if let Some(v) = self.completed_at {
            progress.completed_at = Some(v);
        }
        if let Some(v) = self.attempts {
            progress.attempts = v;
        }
        if self.error.is_some() {
            progress.error = self.error;
        }
        if let Some(v) = self.skip_reason {
            progress.skip_reason = Some(v);
        }
    }
}

// ── CAS-guarded transition ──

/// Transition step `index` (1-based) from `from` to `to`, applying side effects.
/// Returns Ok(true) on success, Ok(false) on CAS miss (current != from).
pub fn transition(
    state: &mut RunState,
    index: usize,
    from: StepStatus,
    to: StepStatus,
    side_effect: Option<StepUpdate>,
) -> Result<bool> {
    let slot = state.slot(index)?;
    if state.plan.steps[slot].status != from {
        return Ok(false); // CAS miss
    }
    if !is_valid_transition(from, to) {
        bail!("invalid transition: step {index} {from:?} → {to:?}");
    }
    state.plan.steps[slot].status = to;
    if let Some(update) = side_effect {
        update.apply(&mut state.progress[slot]);
    }
    state.version += 1;
    Ok(true)
}

// ── RunState methods ──

impl RunState {
    pub fn new(
        task_id: &str,
        content_hash: &str,
        source_file: &str,
        classification: Classification,
        plan: Plan,
        now: &str,
    ) -> Self {
        let progress = vec![StepProgress::default(); plan.steps.len()];
        RunState {
            task_id: task_id.to_string(),
            content_hash: content_hash.to_string(),
            source_file: source_file.to_string(),
            status: RunStatus::Planned,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            classification,
            plan,
            progress,
            iterations: 0,
            retried: false,
            quarantine_id: None,
            final_path: None,
            version: 0,
        }
    }

    fn slot(&self, index: usize) -> Result<usize> {
        if index == 0 || index > self.plan.steps.len() || self.progress.len() != self.plan.steps.len()
        {
            bail!("step not found: {index}");
        }
        Ok(index - 1)
    }

    pub fn progress(&self, index: usize) -> Result<&StepProgress> {
        let slot = self.slot(index)?;
        Ok(&self.progress[slot])
    }

    pub fn progress_mut(&mut self, index: usize) -> Result<&mut StepProgress> {
        let slot = self.slot(index)?;
        Ok(&mut self.progress[slot])
    }

    /// First step that failed, if any.
    pub fn failed_step(&self) -> Option<usize> {
        self.plan
            .steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| s.index)
    }

    /// Mark every still-pending step skipped.
    pub fn skip_remaining(&mut self, reason: &str) -> Result<()> {
        let pending: Vec<usize> = self
            .plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.index)
            .collect();
        for index in pending {
            transition(
                self,
                index,
                StepStatus::Pending,
                StepStatus::Skipped,
                Some(StepUpdate {
                    skip_reason: Some(reason.to_string()),
                    ..Default::default()
                }),
            )?;
        }
        Ok(())
    }

    pub fn set_status(&mut self, status: RunStatus, now: &str) {
        self.status = status;
        self.updated_at = now.to_string();
        self.version += 1;
    }
}
