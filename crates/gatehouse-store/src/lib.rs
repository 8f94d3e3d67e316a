pub mod idempotency;
pub mod lock;
pub mod paths;

pub use idempotency::IdempotencyTracker;
pub use lock::{InstanceLock, LockError, LockInfo, LockState};
pub use paths::VaultPaths;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Atomic write: write to temp file in same dir, fsync, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// First name in `dir` derived from `file_name` that does not exist yet:
/// `name.md`, then `name_1.md`, `name_2.md`, ...
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, Some(e)),
        _ => (file_name, None),
    };
    let mut n = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename `src` into `dest_dir` under `file_name`, never clobbering an existing file.
/// Returns the final path.
pub fn move_into(src: &Path, dest_dir: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let dest = unique_path(dest_dir, file_name);
    fs::rename(src, &dest).map_err(|e| {
        anyhow::anyhow!("moving {} -> {}: {}", src.display(), dest.display(), e)
    })?;
    Ok(dest)
}

/// Format a timestamp the way every persisted record stores it.
pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}
