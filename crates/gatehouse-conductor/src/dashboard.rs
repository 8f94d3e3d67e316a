use anyhow::{Context, Result};
use gatehouse_store::write_atomic;
use std::path::{Path, PathBuf};

const ACTIVITY_HEADER: &str = "## Recent Activity";

/// Activity feed in `Dashboard.md`: newest entry first under `## Recent Activity`.
pub struct Dashboard {
    path: PathBuf,
}

impl Dashboard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn record(&self, entry: &str) -> Result<()> {
        let current = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()))
            }
        };
        let updated = insert_activity(&current, entry);
        write_atomic(&self.path, updated.as_bytes())
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

fn insert_activity(content: &str, entry: &str) -> String {
    let line = format!("- {entry}");
    if content.trim().is_empty() {
        return format!("# Dashboard\n\n{ACTIVITY_HEADER}\n\n{line}\n");
    }

    let lines: Vec<&str> = content.lines().collect();
    let Some(header) = lines.iter().position(|l| l.trim_end() == ACTIVITY_HEADER) else {
        return format!("{}\n\n{ACTIVITY_HEADER}\n\n{line}\n", content.trim_end());
    };

    // Skip blank lines after the header so the entry sits on top of the list.
    let mut at = header + 1;
    while at < lines.len() && lines[at].trim().is_empty() {
        at += 1;
    }
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 2);
    out.extend_from_slice(&lines[..header + 1]);
    out.push("");
    out.push(&line);
    if at < lines.len() && !lines[at].starts_with("- ") {
        out.push("");
    }
    out.extend_from_slice(&lines[at..]);
    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}
