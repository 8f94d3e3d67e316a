//! Approval gateway: creates decision documents for risky steps, polls them
//! until a human decides or the deadline passes, and finalizes each request
//! exactly once.
//!
//! Each request has two files:
//! - `Needs_Approval/<request_id>.md`, the decision document a reviewer edits;
//! - `Logs/approvals/<request_id>.json`, the gateway's own record. Once the
//!   record is finalized it is authoritative and the document is never
//!   parsed again.

pub mod document;

use crate::clock::Clock;
use crate::wait::{wait_with_deadline, WaitOutcome};
use anyhow::{bail, Context, Result};
use gatehouse_core::config::MIN_POLL_INTERVAL_SECS;
use gatehouse_core::{RiskLevel, Step};
use gatehouse_store::{format_rfc3339, paths::list_documents, write_atomic, VaultPaths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::document::DecisionDocument;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed namespace UUID for approval requests.
const APPROVAL_NS: Uuid = Uuid::from_bytes([
    0x9a, 0x7e, 0x40, 0x05, 0x6a, 0x7e, 0x50, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);

/// Deterministic request ID per task and step, so a resumed run finds the
/// request it created before.
pub fn request_id_for(task_id: &str, step_index: usize) -> String {
    Uuid::new_v5(&APPROVAL_NS, format!("{task_id}-{step_index}").as_bytes()).to_string()
}

/// The gateway's own record of a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub request_id: String,
    pub task_id: String,
    pub step_index: usize,
    pub action: String,
    pub status: ApprovalStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub finalized: bool,
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,
}

/// Inputs for a new decision document.
pub struct ApprovalRequest<'a> {
    pub request_id: &'a str,
    pub task_id: &'a str,
    pub step: &'a Step,
    pub risk_level: RiskLevel,
    pub payload: &'a serde_json::Value,
    pub task_text: &'a str,
    pub timeout: Duration,
}

pub struct ApprovalGateway {
    paths: VaultPaths,
    clock: Arc<dyn Clock>,
}

impl ApprovalGateway {
    pub fn new(paths: VaultPaths, clock: Arc<dyn Clock>) -> Self {
        Self { paths, clock }
    }

    pub fn document_path(&self, request_id: &str) -> PathBuf {
        self.paths.needs_approval.join(format!("{request_id}.md"))
    }

    fn record_path(&self, request_id: &str) -> PathBuf {
        self.paths.approvals_dir.join(format!("{request_id}.json"))
    }

    pub fn load_record(&self, request_id: &str) -> Result<Option<ApprovalRecord>> {
        let path = self.record_path(request_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading approval record: {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("parsing approval record: {}", path.display()))?;
        Ok(Some(record))
    }

    fn save_record(&self, record: &ApprovalRecord) -> Result<()> {
        let path = self.record_path(&record.request_id);
        let data = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &data)
            .with_context(|| format!("saving approval record: {}", path.display()))
    }

    /// Write a PENDING decision document. Idempotent per request ID: an
    /// existing record is returned untouched, and an existing document (which
    /// a reviewer may already have edited) is never overwritten.
    pub fn create_request(&self, req: &ApprovalRequest<'_>) -> Result<ApprovalRecord> {
        if let Some(existing) = self.load_record(req.request_id)? {
            tracing::debug!(request_id = req.request_id, "approval request already exists");
            return Ok(existing);
        }

        let now = self.clock.now();
        let created_at = format_rfc3339(now);
        let doc_path = self.document_path(req.request_id);
        if doc_path.exists() {
            tracing::warn!(
                request_id = req.request_id,
                "decision document exists without a record, keeping it"
            );
        } else {
            let content = DecisionDocument {
                request_id: req.request_id,
                task_id: req.task_id,
                step: req.step,
                risk_level: req.risk_level,
                created_at: &created_at,
                expires_at: &format_rfc3339(now + req.timeout),
                payload: req.payload,
                task_text: req.task_text,
            }
            .render();
            write_atomic(&doc_path, content.as_bytes())
                .with_context(|| format!("writing decision document: {}", doc_path.display()))?;
        }

        let record = ApprovalRecord {
            request_id: req.request_id.to_string(),
            task_id: req.task_id.to_string(),
            step_index: req.step.index,
            action: req.step.action.clone(),
            status: ApprovalStatus::Pending,
            created_at,
            decided_at: None,
            comments: None,
            finalized: false,
            document: doc_path.display().to_string(),
            final_path: None,
        };
        self.save_record(&record)?;
        tracing::info!(
            request_id = req.request_id,
            task_id = req.task_id,
            step = req.step.index,
            "approval requested"
        );
        Ok(record)
    }

    /// Current status. A finalized record wins; otherwise the document is
    /// parsed, and a missing document reads as pending.
    pub fn poll_status(&self, request_id: &str) -> Result<ApprovalStatus> {
        if let Some(record) = self.load_record(request_id)? {
            if record.finalized {
                return Ok(record.status);
            }
        }
        let path = self.document_path(request_id);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(document::parse(&content).status),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(request_id, "decision document missing, treating as pending");
                Ok(ApprovalStatus::Pending)
            }
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Poll every `poll_interval` (at least 5s) until a terminal status is
    /// read or `timeout` elapses, which yields `Timeout`. Cancellation yields
    /// `Pending` and leaves the request open.
    pub async fn wait_for_decision(
        &self,
        request_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<ApprovalStatus> {
        let interval = poll_interval.max(Duration::from_secs(MIN_POLL_INTERVAL_SECS));
        let outcome = wait_with_deadline(self.clock.as_ref(), timeout, interval, cancel, || {
            let status = self.poll_status(request_id);
            async move { status.map(|s| s.is_terminal().then_some(s)) }
        })
        .await?;

        Ok(match outcome {
            WaitOutcome::Ready(status) => status,
            WaitOutcome::TimedOut => {
                tracing::info!(request_id, "approval timed out");
                ApprovalStatus::Timeout
            }
            WaitOutcome::Cancelled => ApprovalStatus::Pending,
        })
    }

    /// Move the decision document to its status-named destination with a
    /// footer, and seal the record. A second call returns the sealed record
    /// without touching the file system.
    pub fn finalize(&self, request_id: &str, status: ApprovalStatus) -> Result<ApprovalRecord> {
        if !status.is_terminal() {
            bail!("cannot finalize {request_id} as {status}");
        }
        let mut record = self
            .load_record(request_id)?
            .ok_or_else(|| anyhow::anyhow!("unknown approval request: {request_id}"))?;
        if record.finalized {
            tracing::debug!(request_id, "already finalized");
            return Ok(record);
        }

        let now = format_rfc3339(self.clock.now());
        let source = self.document_path(request_id);
        // Read at the last moment so concurrent reviewer edits are kept.
        let content = match std::fs::read_to_string(&source) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).with_context(|| format!("reading {}", source.display())),
        };

        let final_path = match &content {
            Some(content) => {
                let (dir, prefix) = match status {
                    ApprovalStatus::Approved => (&self.paths.approved, "approved"),
                    ApprovalStatus::Rejected => (&self.paths.rejected, "rejected"),
                    _ => (&self.paths.inbox, "timeout"),
                };
                let dest =
                    gatehouse_store::unique_path(dir, &format!("{prefix}_{request_id}.md"));
                let body = document::append_footer(content, status, &now);
                write_atomic(&dest, body.as_bytes())
                    .with_context(|| format!("writing {}", dest.display()))?;
                record.comments = document::parse(content).comments;
                Some(dest)
            }
            None => {
                tracing::warn!(request_id, "decision document vanished before finalize");
                None
            }
        };

        record.status = status;
        record.decided_at = Some(now);
        record.finalized = true;
        record.final_path = final_path.as_deref().map(|p| p.display().to_string());
        self.save_record(&record)?;

        if content.is_some() {
            remove_if_exists(&source)?;
        }
        tracing::info!(request_id, status = %status, "approval finalized");
        Ok(record)
    }

    /// Record a reviewer decision by rewriting the document's status line.
    pub fn record_decision(
        &self,
        request_id: &str,
        status: ApprovalStatus,
        comment: Option<&str>,
    ) -> Result<()> {
        if let Some(record) = self.load_record(request_id)? {
            if record.finalized {
                bail!("approval {request_id} is already finalized as {}", record.status);
            }
        }
        let path = self.document_path(request_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading decision document: {}", path.display()))?;
        let edited = document::set_decision(&content, status, comment)?;
        write_atomic(&path, edited.as_bytes())
            .with_context(|| format!("writing decision document: {}", path.display()))
    }

    /// Request IDs with an open decision document, sorted.
    pub fn pending_requests(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for doc in list_documents(&self.paths.needs_approval)? {
            let Some(id) = doc.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load_record(id) {
                Ok(Some(record)) if record.finalized => {}
                _ => ids.push(id.to_string()),
            }
        }
        Ok(ids)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
