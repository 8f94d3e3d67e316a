use crate::state::machine::RunState;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Location: `{runs_dir}/{task_id}.json`
pub fn run_path(runs_dir: &Path, task_id: &str) -> PathBuf {
    runs_dir.join(format!("{task_id}.json"))
}

/// Load run state from disk. Returns None if the file doesn't exist.
pub fn load_run(runs_dir: &Path, task_id: &str) -> Result<Option<RunState>> {
    let path = run_path(runs_dir, task_id);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading run state: {}", path.display()))?;
    let state: RunState = serde_json::from_str(&content)
        .with_context(|| format!("parsing run state: {}", path.display()))?;
    Ok(Some(state))
}

/// Save run state atomically.
pub fn save_run(runs_dir: &Path, state: &RunState) -> Result<()> {
    let path = run_path(runs_dir, &state.task_id);
    let data = serde_json::to_string_pretty(state)?;
    gatehouse_store::write_atomic(&path, data.as_bytes())
        .with_context(|| format!("saving run state: {}", path.display()))?;
    Ok(())
}
