use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONTENTION_RETRIES: u32 = 3;
const CONTENTION_BACKOFF: Duration = Duration::from_millis(50);

/// Identity of the process holding the instance lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance is running (pid {pid}, started {started_at})")]
    Held { pid: u32, started_at: String },
    #[error("lock file i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Observed state of the lock file, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held(LockInfo),
    /// Identity left behind by a holder that exited without releasing.
    Stale(LockInfo),
}

/// Exclusive single-instance lock backed by an OS advisory lock on
/// `Logs/gatehouse.lock`. Released (and the identity cleared) on drop.
pub struct InstanceLock {
    file: File,
    path: PathBuf,
    info: LockInfo,
}

impl InstanceLock {
    /// Try to acquire the lock (non-blocking).
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if !try_lock_with_retries(&file) {
            let info = read_info(path).unwrap_or(LockInfo {
                pid: 0,
                started_at: "unknown".to_string(),
            });
            return Err(LockError::Held {
                pid: info.pid,
                started_at: info.started_at,
            });
        }

        if let Some(stale) = read_info(path) {
            tracing::warn!(
                pid = stale.pid,
                started_at = %stale.started_at,
                "reclaiming stale instance lock"
            );
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: crate::now_rfc3339(),
        };
        let data = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&data)?;
        file.sync_data()?;

        tracing::debug!(pid = info.pid, path = %path.display(), "instance lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Inspect the lock without taking it. Only a shared lock is tried.
    pub fn inspect(path: &Path) -> std::io::Result<LockState> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockState::Free),
            Err(e) => return Err(e),
        };
        let info = read_info(path);
        if file.try_lock_shared().is_err() {
            return Ok(LockState::Held(info.unwrap_or(LockInfo {
                pid: 0,
                started_at: "unknown".to_string(),
            })));
        }
        let _ = file.unlock();
        Ok(match info {
            Some(info) => LockState::Stale(info),
            None => LockState::Free,
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // An empty lock file means a clean release; leftover identity means a crash.
        let _ = self.file.set_len(0);
        let _ = self.file.sync_data();
        let _ = self.file.unlock();
        tracing::debug!(path = %self.path.display(), "instance lock released");
    }
}

/// Contention can come from a status check holding a shared lock for an
/// instant, so a failed attempt is retried briefly before giving up.
fn try_lock_with_retries(file: &File) -> bool {
    for attempt in 0..=CONTENTION_RETRIES {
        if file.try_lock_exclusive().is_ok() {
            return true;
        }
        if attempt < CONTENTION_RETRIES {
            std::thread::sleep(CONTENTION_BACKOFF);
        }
    }
    false
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}
