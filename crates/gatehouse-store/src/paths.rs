use std::path::{Path, PathBuf};

/// All well-known paths of a vault.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub plans: PathBuf,
    pub needs_approval: PathBuf,
    pub approved: PathBuf,
    pub rejected: PathBuf,
    pub done: PathBuf,
    pub errors: PathBuf,
    pub outbox: PathBuf,
    pub logs: PathBuf,
    pub audit_log: PathBuf,
    pub processed_json: PathBuf,
    pub lock_file: PathBuf,
    pub approvals_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub dashboard: PathBuf,
    pub config_json: PathBuf,
}

impl VaultPaths {
    /// Derive all paths from a vault root. Pure computation, no I/O.
    pub fn discover(vault_root: impl Into<PathBuf>) -> Self {
        let root = vault_root.into();
        let logs = root.join("Logs");
        Self {
            inbox: root.join("Inbox"),
            plans: root.join("Plans"),
            needs_approval: root.join("Needs_Approval"),
            approved: root.join("Approved"),
            rejected: root.join("Rejected"),
            done: root.join("Done"),
            errors: root.join("Errors"),
            outbox: root.join("Outbox"),
            audit_log: logs.join("audit.jsonl"),
            processed_json: logs.join("processed.json"),
            lock_file: logs.join("gatehouse.lock"),
            approvals_dir: logs.join("approvals"),
            runs_dir: logs.join("runs"),
            dashboard: root.join("Dashboard.md"),
            config_json: root.join("gatehouse.json"),
            logs,
            root,
        }
    }

    /// Create all required directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in [
            &self.inbox,
            &self.plans,
            &self.needs_approval,
            &self.approved,
            &self.rejected,
            &self.done,
            &self.errors,
            &self.outbox,
            &self.logs,
            &self.approvals_dir,
            &self.runs_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Lifecycle directories in pipeline order, for status reporting.
    pub fn stage_dirs(&self) -> [(&'static str, &Path); 7] {
        [
            ("Inbox", self.inbox.as_path()),
            ("Plans", self.plans.as_path()),
            ("Needs_Approval", self.needs_approval.as_path()),
            ("Approved", self.approved.as_path()),
            ("Rejected", self.rejected.as_path()),
            ("Done", self.done.as_path()),
            ("Errors", self.errors.as_path()),
        ]
    }

    /// Task documents waiting in the inbox, sorted by file name.
    pub fn inbox_tasks(&self) -> anyhow::Result<Vec<PathBuf>> {
        list_documents(&self.inbox)
    }
}

/// A task document is a visible `.md` file.
pub fn is_task_document(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    let markdown = path.extension().and_then(|e| e.to_str()) == Some("md");
    visible && markdown && path.is_file()
}

/// Markdown documents directly under `dir`, sorted by path. Missing dir is empty.
pub fn list_documents(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(anyhow::anyhow!("listing {}: {}", dir.display(), e)),
    };
    let mut docs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if is_task_document(&path) {
            docs.push(path);
        }
    }
    docs.sort();
    Ok(docs)
}

/// Count markdown documents under `dir`, descending into sub-directories
/// (the quarantine directory is split by date).
pub fn count_documents(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .map(|p| {
            if p.is_dir() {
                count_documents(&p)
            } else if is_task_document(&p) {
                1
            } else {
                0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_builds_correct_paths() {
        let p = VaultPaths::discover("/tmp/vault");
        assert_eq!(p.inbox, PathBuf::from("/tmp/vault/Inbox"));
        assert_eq!(p.needs_approval, PathBuf::from("/tmp/vault/Needs_Approval"));
        assert_eq!(p.audit_log, PathBuf::from("/tmp/vault/Logs/audit.jsonl"));
        assert_eq!(p.lock_file, PathBuf::from("/tmp/vault/Logs/gatehouse.lock"));
        assert_eq!(p.runs_dir, PathBuf::from("/tmp/vault/Logs/runs"));
        assert_eq!(p.dashboard, PathBuf::from("/tmp/vault/Dashboard.md"));
        assert_eq!(p.config_json, PathBuf::from("/tmp/vault/gatehouse.json"));
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = VaultPaths::discover(tmp.path());
        p.ensure_layout().unwrap();
        p.ensure_layout().unwrap();
        for (_, dir) in p.stage_dirs() {
            assert!(dir.is_dir(), "{}", dir.display());
        }
        assert!(p.approvals_dir.is_dir());
    }

    #[test]
    fn inbox_lists_only_visible_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let p = VaultPaths::discover(tmp.path());
        p.ensure_layout().unwrap();
        std::fs::write(p.inbox.join("b.md"), "b").unwrap();
        std::fs::write(p.inbox.join("a.md"), "a").unwrap();
        std::fs::write(p.inbox.join(".hidden.md"), "x").unwrap();
        std::fs::write(p.inbox.join("notes.txt"), "x").unwrap();
        std::fs::create_dir(p.inbox.join("sub.md")).unwrap();

        let tasks = p.inbox_tasks().unwrap();
        assert_eq!(tasks, vec![p.inbox.join("a.md"), p.inbox.join("b.md")]);
    }

    #[test]
    fn count_descends_into_dated_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let p = VaultPaths::discover(tmp.path());
        let day = p.errors.join("2026-01-02");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(day.join("x_error_01.md"), "x").unwrap();
        std::fs::write(day.join("x_error_01.meta.json"), "{}").unwrap();
        assert_eq!(count_documents(&p.errors), 1);
        assert_eq!(count_documents(&p.done), 0);
    }
}
