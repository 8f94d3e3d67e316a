//! Persistent set of content hashes that have already been admitted.
//!
//! Loaded once at startup and rewritten atomically on every insert, so the
//! on-disk set never lags the in-memory one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEntry {
    pub processed_at: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProcessedFile {
    #[serde(default)]
    processed: BTreeMap<String, ProcessedEntry>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    count: usize,
}

pub struct IdempotencyTracker {
    path: PathBuf,
    store: ProcessedFile,
}

impl IdempotencyTracker {
    /// Load from `path`. Missing file is an empty set; an unreadable or corrupt
    /// one is logged and also treated as empty.
    pub fn load(path: &Path) -> Self {
        let store = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<ProcessedFile>(&content) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "idempotency store is corrupt, starting empty"
                    );
                    ProcessedFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProcessedFile::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "idempotency store is unreadable, starting empty"
                );
                ProcessedFile::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            store,
        }
    }

    pub fn is_processed(&self, hash: &str) -> bool {
        self.store.processed.contains_key(hash)
    }

    pub fn get(&self, hash: &str) -> Option<&ProcessedEntry> {
        self.store.processed.get(hash)
    }

    pub fn len(&self) -> usize {
        self.store.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.processed.is_empty()
    }

    /// Record `hash` and flush to disk before returning. On a failed flush the
    /// in-memory set is rolled back so both views stay equal.
    pub fn mark_processed(&mut self, hash: &str, metadata: serde_json::Value) -> Result<()> {
        let now = crate::now_rfc3339();
        let previous = self.store.processed.insert(
            hash.to_string(),
            ProcessedEntry {
                processed_at: now.clone(),
                metadata,
            },
        );
        let previous_updated = self.store.last_updated.replace(now);
        self.store.count = self.store.processed.len();

        if let Err(e) = self.flush() {
            match previous {
                Some(entry) => {
                    self.store.processed.insert(hash.to_string(), entry);
                }
                None => {
                    self.store.processed.remove(hash);
                }
            }
            self.store.last_updated = previous_updated;
            self.store.count = self.store.processed.len();
            return Err(e);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.store)?;
        crate::write_atomic(&self.path, &data)
            .with_context(|| format!("saving idempotency store: {}", self.path.display()))
    }
}
