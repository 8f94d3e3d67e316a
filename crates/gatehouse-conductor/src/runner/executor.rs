use super::backoff::BackoffPolicy;
use super::performer::ActionPerformer;
use crate::clock::Clock;
use crate::failure::{FailureKind, StepError};
use gatehouse_core::config::RetryConfig;
use gatehouse_core::{RiskLevel, Step};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct StepSuccess {
    pub data: Map<String, Value>,
    pub attempts: u32,
}

/// Runs one step against a performer with bounded retry.
///
/// Only transient failures are retried, never on a critical-risk task, and
/// the performer is called at most `max_retries` times.
pub struct RetryingExecutor {
    max_retries: u32,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryingExecutor {
    pub fn new(max_retries: u32, backoff: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff,
            clock,
        }
    }

    pub fn from_config(cfg: &RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(cfg.max_retries, BackoffPolicy::from_config(cfg), clock)
    }

    pub async fn execute(
        &self,
        step: &Step,
        risk_level: RiskLevel,
        payload: &Map<String, Value>,
        performer: &dyn ActionPerformer,
    ) -> Result<StepSuccess, StepError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (kind, message) = match performer.execute(&step.action, payload).await {
                Ok(outcome) if outcome.success => {
                    tracing::debug!(step = step.index, action = %step.action, attempt, "step succeeded");
                    return Ok(StepSuccess {
                        data: outcome.data,
                        attempts: attempt,
                    });
                }
                Ok(outcome) => (
                    outcome.error_kind.unwrap_or(FailureKind::Internal),
                    outcome
                        .error
                        .unwrap_or_else(|| "performer reported failure".to_string()),
                ),
                Err(e) => (FailureKind::Internal, format!("{e:#}")),
            };

            let action = step.action.clone();
            if risk_level == RiskLevel::Critical {
                return Err(StepError::Critical {
                    action,
                    kind,
                    message,
                });
            }
            if kind != FailureKind::Transient {
                return Err(StepError::NonRetryable {
                    action,
                    kind,
                    message,
                });
            }
            if attempt >= self.max_retries {
                return Err(StepError::Exhausted {
                    action,
                    attempts: attempt,
                    kind,
                    message,
                });
            }

            let delay = self.backoff.delay(attempt);
            tracing::warn!(
                step = step.index,
                action = %step.action,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "transient failure, retrying"
            );
            self.clock.sleep(delay).await;
        }
    }
}
