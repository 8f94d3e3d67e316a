//! Default action performer: hands external actions to delivery agents by
//! writing them to `Outbox/`, and completes internal bookkeeping steps in place.

use anyhow::{Context, Result};
use gatehouse_conductor::{ActionOutcome, ActionPerformer, FailureKind};
use gatehouse_store::{now_rfc3339, write_atomic};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Action types with an effect outside the vault.
const EXTERNAL_ACTIONS: &[&str] = &["send_email", "publish_post", "transfer_funds", "delete_items"];

#[derive(Serialize)]
struct Envelope<'a> {
    id: &'a str,
    action: &'a str,
    queued_at: String,
    payload: &'a Map<String, Value>,
}

pub struct OutboxPerformer {
    outbox: PathBuf,
}

impl OutboxPerformer {
    pub fn new(outbox: &Path) -> Self {
        Self {
            outbox: outbox.to_path_buf(),
        }
    }

    fn enqueue(&self, action_type: &str, payload: &Map<String, Value>) -> Result<PathBuf> {
        let id = ulid::Ulid::new().to_string().to_lowercase();
        let envelope = Envelope {
            id: &id,
            action: action_type,
            queued_at: now_rfc3339(),
            payload,
        };
        let path = self.outbox.join(format!("{id}_{action_type}.json"));
        let data = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&path, &data).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl ActionPerformer for OutboxPerformer {
    async fn execute(
        &self,
        action_type: &str,
        payload: &Map<String, Value>,
    ) -> Result<ActionOutcome> {
        if action_type.trim().is_empty() {
            return Ok(ActionOutcome::failed(FailureKind::Validation, "empty action type"));
        }

        let mut data = Map::new();
        data.insert("action".into(), Value::String(action_type.to_string()));
        if EXTERNAL_ACTIONS.contains(&action_type) {
            let path = self.enqueue(action_type, payload)?;
            tracing::info!(action = action_type, path = %path.display(), "queued in outbox");
            data.insert("outbox".into(), Value::String(path.display().to_string()));
        } else {
            tracing::debug!(action = action_type, "handled locally");
            data.insert("handled".into(), Value::String("local".into()));
        }
        Ok(ActionOutcome::ok(data))
    }
}
