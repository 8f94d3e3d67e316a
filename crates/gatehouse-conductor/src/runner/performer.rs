use crate::failure::FailureKind;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

/// What a performer reports for one action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unclassified failures are treated as internal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl ActionOutcome {
    pub fn ok(data: Map<String, Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Map::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}

/// Boundary to the collaborators that actually send, post, transfer, or delete.
/// Payload fields are passed through untouched.
#[async_trait::async_trait]
pub trait ActionPerformer: Send + Sync {
    async fn execute(&self, action_type: &str, payload: &Map<String, Value>)
        -> Result<ActionOutcome>;
}

/// Scripted performer for testing. Pops outcomes per action type; succeeds
/// once the script for an action is empty.
pub struct MockPerformer {
    scripts: Mutex<HashMap<String, Vec<ActionOutcome>>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockPerformer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPerformer {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outcomes(&self, action_type: &str, outcomes: Vec<ActionOutcome>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(action_type.to_string(), outcomes);
    }

    /// Action types in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, action_type: &str) -> usize {
        self.calls().iter().filter(|a| *a == action_type).count()
    }
}

#[async_trait::async_trait]
impl ActionPerformer for MockPerformer {
    async fn execute(
        &self,
        action_type: &str,
        _payload: &Map<String, Value>,
    ) -> Result<ActionOutcome> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action_type.to_string());

        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = scripts.get_mut(action_type) {
            if !queue.is_empty() {
                return Ok(queue.remove(0));
            }
        }
        let mut data = Map::new();
        data.insert("action".into(), Value::String(action_type.to_string()));
        Ok(ActionOutcome::ok(data))
    }
}
