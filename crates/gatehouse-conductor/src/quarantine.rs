//! Error quarantine under `Errors/<YYYY-MM-DD>/`.
//!
//! A quarantined document is renamed to `<stem>_error_<id8>.md` and gets a
//! `<stem>_error_<id8>.meta.json` sidecar describing the failure and whether
//! it may be released for one scheduled retry.

use crate::failure::FailureKind;
use anyhow::{Context, Result};
use gatehouse_store::{format_rfc3339, move_into, parse_rfc3339, write_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantineRecord {
    pub error_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// File name the document had before quarantine.
    pub original_name: String,
    pub quarantined_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub failure_kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub attempts: u32,
    pub timestamp: String,
    pub retry_eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_not_before: Option<String>,
    #[serde(default)]
    pub retry_attempted: bool,
}

impl QuarantineRecord {
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.retry_eligible
            && !self.retry_attempted
            && self
                .retry_not_before
                .as_deref()
                .and_then(parse_rfc3339)
                .is_some_and(|t| t <= now)
    }
}

/// Caller-supplied failure context.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub task_id: Option<String>,
    pub step_index: Option<usize>,
    pub action: Option<String>,
    pub failure_kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    /// False when the task has already used its retry or is critical risk.
    pub allow_retry: bool,
}

pub struct Quarantine {
    errors_dir: PathBuf,
    retry_delay: Duration,
}

impl Quarantine {
    pub fn new(errors_dir: &Path, retry_delay: Duration) -> Self {
        Self {
            errors_dir: errors_dir.to_path_buf(),
            retry_delay,
        }
    }

    /// Move `doc` into today's error directory and write its sidecar.
    pub fn quarantine(
        &self,
        doc: &Path,
        ctx: FailureContext,
        now: OffsetDateTime,
    ) -> Result<QuarantineRecord> {
        let error_id = ulid::Ulid::new().to_string().to_lowercase();
        let id8 = &error_id[error_id.len() - 8..];
        let original_name = doc
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("task.md")
            .to_string();
        let stem = doc.file_stem().and_then(|s| s.to_str()).unwrap_or("task");
        let ext = doc.extension().and_then(|e| e.to_str()).unwrap_or("md");

        let day_dir = self.errors_dir.join(date_dir_name(now));
        let moved = move_into(doc, &day_dir, &format!("{stem}_error_{id8}.{ext}"))
            .with_context(|| format!("quarantining {}", doc.display()))?;

        let retry_eligible = ctx.allow_retry && ctx.failure_kind.is_retryable();
        let record = QuarantineRecord {
            error_id,
            task_id: ctx.task_id,
            original_name,
            quarantined_path: moved.display().to_string(),
            step_index: ctx.step_index,
            action: ctx.action,
            failure_kind: ctx.failure_kind,
            message: ctx.message,
            attempts: ctx.attempts,
            timestamp: format_rfc3339(now),
            retry_eligible,
            retry_not_before: retry_eligible.then(|| format_rfc3339(now + self.retry_delay)),
            retry_attempted: false,
        };
        self.save(&meta_path_for(&moved), &record)?;
        tracing::warn!(
            error_id = %record.error_id,
            task_id = record.task_id.as_deref().unwrap_or("-"),
            kind = %record.failure_kind,
            retry_eligible,
            "document quarantined"
        );
        Ok(record)
    }

    pub fn save(&self, meta_path: &Path, record: &QuarantineRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)?;
        write_atomic(meta_path, &data)
            .with_context(|| format!("writing quarantine sidecar: {}", meta_path.display()))
    }

    /// Every sidecar under the error directory, oldest day first.
    pub fn list(&self) -> Result<Vec<(PathBuf, QuarantineRecord)>> {
        let mut out = Vec::new();
        for day in sorted_entries(&self.errors_dir)? {
            if !day.is_dir() {
                continue;
            }
            for path in sorted_entries(&day)? {
                let is_meta = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(META_SUFFIX));
                if !is_meta {
                    continue;
                }
                let parsed = std::fs::read_to_string(&path)
                    .map_err(anyhow::Error::from)
                    .and_then(|c| Ok(serde_json::from_str::<QuarantineRecord>(&c)?));
                match parsed {
                    Ok(record) => out.push((path, record)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping bad sidecar")
                    }
                }
            }
        }
        Ok(out)
    }

    /// Entries whose one scheduled retry is due.
    pub fn due_retries(&self, now: OffsetDateTime) -> Result<Vec<(PathBuf, QuarantineRecord)>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|(_, r)| r.is_due(now))
            .collect())
    }

    /// Remove dated directories older than `days`. Returns how many were removed.
    pub fn prune_older_than(&self, days: u32, now: OffsetDateTime) -> Result<usize> {
        let cutoff = date_dir_name(now - Duration::from_secs(u64::from(days) * 86_400));
        let mut removed = 0;
        for day in sorted_entries(&self.errors_dir)? {
            let Some(name) = day.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // YYYY-MM-DD sorts lexically in date order.
            if day.is_dir() && is_date_dir_name(name) && name < cutoff.as_str() {
                std::fs::remove_dir_all(&day)
                    .with_context(|| format!("removing {}", day.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// `x_error_ab12cd34.md` -> `x_error_ab12cd34.meta.json`
pub fn meta_path_for(doc: &Path) -> PathBuf {
    let stem = doc.file_stem().and_then(|s| s.to_str()).unwrap_or("task");
    doc.with_file_name(format!("{stem}{META_SUFFIX}"))
}

fn date_dir_name(ts: OffsetDateTime) -> String {
    let d = ts.date();
    format!("{:04}-{:02}-{:02}", d.year(), u8::from(d.month()), d.day())
}

fn is_date_dir_name(name: &str) -> bool {
    let b = name.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut paths = entries
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}
