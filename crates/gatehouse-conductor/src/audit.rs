//! Append-only audit trail at `Logs/audit.jsonl`.
//!
//! One JSON object per line. Each append is a single write of a complete,
//! newline-terminated record followed by an fsync; a torn line left by a crash
//! is terminated before the next record so earlier entries stay readable.

use anyhow::{Context, Result};
use gatehouse_store::{format_rfc3339, parse_rfc3339, write_atomic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    TaskIngested,
    TaskClassified,
    PlanCreated,
    ApprovalRequested,
    ApprovalDecided,
    StepExecuted,
    StepFailed,
    TaskCompleted,
    TaskRejected,
    TaskTimedOut,
    TaskQuarantined,
    RetryReleased,
    DuplicateSkipped,
    IngestionFailed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::TaskIngested => "task_ingested",
            AuditEvent::TaskClassified => "task_classified",
            AuditEvent::PlanCreated => "plan_created",
            AuditEvent::ApprovalRequested => "approval_requested",
            AuditEvent::ApprovalDecided => "approval_decided",
            AuditEvent::StepExecuted => "step_executed",
            AuditEvent::StepFailed => "step_failed",
            AuditEvent::TaskCompleted => "task_completed",
            AuditEvent::TaskRejected => "task_rejected",
            AuditEvent::TaskTimedOut => "task_timed_out",
            AuditEvent::TaskQuarantined => "task_quarantined",
            AuditEvent::RetryReleased => "retry_released",
            AuditEvent::DuplicateSkipped => "duplicate_skipped",
            AuditEvent::IngestionFailed => "ingestion_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::StepFailed | AuditEvent::TaskQuarantined | AuditEvent::IngestionFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: String,
    pub event: AuditEvent,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(at: OffsetDateTime, event: AuditEvent, status: impl Into<String>) -> Self {
        Self {
            timestamp: format_rfc3339(at),
            event,
            status: status.into(),
            task_id: None,
            request_id: None,
            details: Map::new(),
        }
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn request(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Counts over a window of the audit log.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AuditStats {
    pub since: String,
    pub total: usize,
    pub by_event: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_failure_kind: BTreeMap<String, usize>,
}

pub struct AuditTrail {
    path: PathBuf,
}

impl AuditTrail {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening audit log: {}", self.path.display()))?;

        if ends_with_partial_line(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending audit log: {}", self.path.display()))?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Best-effort append: a failed audit write is logged, never fatal.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::error!(event = entry.event.as_str(), error = %e, "audit append failed");
        }
    }

    /// All parseable entries in file order. Torn or foreign lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading audit log: {}", self.path.display()))
            }
        };
        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!(line = n + 1, error = %e, "skipping unparseable audit line"),
            }
        }
        Ok(entries)
    }

    /// Drop entries older than `cutoff` by rewriting the whole file atomically.
    /// Lines that do not parse are kept. Returns the number of entries removed.
    pub fn prune_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("reading audit log: {}", self.path.display()))
            }
        };
        let mut kept = String::with_capacity(content.len());
        let mut removed = 0usize;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let old = serde_json::from_str::<AuditEntry>(line)
                .ok()
                .and_then(|e| parse_rfc3339(&e.timestamp))
                .is_some_and(|ts| ts < cutoff);
            if old {
                removed += 1;
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        if removed > 0 {
            write_atomic(&self.path, kept.as_bytes())
                .with_context(|| format!("rewriting audit log: {}", self.path.display()))?;
            tracing::info!(removed, "pruned audit log");
        }
        Ok(removed)
    }

    pub fn stats(&self, since: OffsetDateTime) -> Result<AuditStats> {
        let mut stats = AuditStats {
            since: format_rfc3339(since),
            ..Default::default()
        };
        for entry in self.read_all()? {
            if !parse_rfc3339(&entry.timestamp).is_some_and(|ts| ts >= since) {
                continue;
            }
            stats.total += 1;
            *stats
                .by_event
                .entry(entry.event.as_str().to_string())
                .or_default() += 1;
            *stats.by_status.entry(entry.status.clone()).or_default() += 1;
            if let Some(kind) = entry.details.get("failure_kind").and_then(Value::as_str) {
                *stats.by_failure_kind.entry(kind.to_string()).or_default() += 1;
            }
        }
        Ok(stats)
    }

    /// Most recent failure entries, newest first.
    pub fn recent_failures(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .filter(|e| e.event.is_failure())
            .take(limit)
            .collect())
    }

    /// Entries mentioning `task_id`, in file order.
    pub fn for_task(&self, task_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .collect())
    }
}

fn ends_with_partial_line(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
