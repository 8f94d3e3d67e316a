use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Polls faster than this are clamped up.
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;
/// Continuous-mode cycles shorter than this are clamped up.
pub const MIN_CYCLE_INTERVAL_SECS: u64 = 60;

// ── Config ──

/// Process-wide settings, built once at startup and passed to every component.
///
/// Stored as `<vault>/gatehouse.json`. Every field is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatehouseConfig {
    pub approval: ApprovalConfig,
    pub retry: RetryConfig,
    pub quarantine: QuarantineConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed,
    #[default]
    ExponentialJitter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total performer attempts per step, including the first.
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of random jitter as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::ExponentialJitter,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuarantineConfig {
    pub retry_delay_secs: u64,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling on step executions per task run.
    pub max_iterations: u32,
    pub cycle_interval_secs: u64,
    pub audit_retention_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            cycle_interval_secs: 300,
            audit_retention_days: 30,
        }
    }
}

impl GatehouseConfig {
    /// Load from `path`. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading config: {}", path.display()))
            }
        };
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok(config.validated())
    }

    /// Clamp out-of-range values, warning about each adjustment.
    pub fn validated(mut self) -> Self {
        if self.approval.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            tracing::warn!(
                configured = self.approval.poll_interval_secs,
                floor = MIN_POLL_INTERVAL_SECS,
                "approval poll interval below floor, clamping"
            );
            self.approval.poll_interval_secs = MIN_POLL_INTERVAL_SECS;
        }
        if self.pipeline.cycle_interval_secs < MIN_CYCLE_INTERVAL_SECS {
            tracing::warn!(
                configured = self.pipeline.cycle_interval_secs,
                floor = MIN_CYCLE_INTERVAL_SECS,
                "cycle interval below floor, clamping"
            );
            self.pipeline.cycle_interval_secs = MIN_CYCLE_INTERVAL_SECS;
        }
        if self.retry.max_retries == 0 {
            tracing::warn!("retry.max_retries is 0, using 1");
            self.retry.max_retries = 1;
        }
        if self.pipeline.max_iterations == 0 {
            tracing::warn!("pipeline.max_iterations is 0, using 1");
            self.pipeline.max_iterations = 1;
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            tracing::warn!(
                configured = self.retry.jitter_ratio,
                "retry.jitter_ratio outside 0..=1, clamping"
            );
            self.retry.jitter_ratio = self.retry.jitter_ratio.clamp(0.0, 1.0);
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            self.retry.max_delay_ms = self.retry.base_delay_ms;
        }
        self
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.approval.poll_interval_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.cycle_interval_secs)
    }

    pub fn quarantine_retry_delay(&self) -> Duration {
        Duration::from_secs(self.quarantine.retry_delay_secs)
    }
}
