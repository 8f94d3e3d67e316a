use crate::outbox::OutboxPerformer;
use anyhow::{Context, Result};
use gatehouse_conductor::{CycleSummary, Pipeline, SystemClock};
use gatehouse_core::{GatehouseConfig, RuleClassifier};
use gatehouse_store::{InstanceLock, LockError, VaultPaths};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Command-line overrides applied on top of `gatehouse.json`.
#[derive(clap::Args, Debug, Default)]
pub struct Overrides {
    /// Seconds to wait for a human decision before timing out
    #[arg(long)]
    pub approval_timeout_secs: Option<u64>,
    /// Seconds between decision-document polls (minimum 5)
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
    /// Performer calls per step before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,
}

impl Overrides {
    pub fn apply(&self, mut config: GatehouseConfig) -> GatehouseConfig {
        if let Some(v) = self.approval_timeout_secs {
            config.approval.timeout_secs = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.approval.poll_interval_secs = v;
        }
        if let Some(v) = self.max_retries {
            config.retry.max_retries = v;
        }
        config.validated()
    }
}

/// `gatehouse once`
pub fn once(paths: &VaultPaths, overrides: &Overrides) -> Result<()> {
    let config = overrides.apply(GatehouseConfig::load(&paths.config_json)?);
    let Some(_lock) = acquire(paths)? else {
        return Ok(());
    };
    let mut pipeline = build(paths, config)?;
    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(pipeline.run_once(&cancel))?;
    print_summary(&summary);
    Ok(())
}

/// `gatehouse run`
pub fn run(paths: &VaultPaths, overrides: &Overrides, interval_secs: Option<u64>) -> Result<()> {
    let mut config = GatehouseConfig::load(&paths.config_json)?;
    if let Some(v) = interval_secs {
        config.pipeline.cycle_interval_secs = v;
    }
    let config = overrides.apply(config);
    let Some(_lock) = acquire(paths)? else {
        return Ok(());
    };
    let interval = config.pipeline.cycle_interval_secs;
    let mut pipeline = build(paths, config)?;
    let cancel = CancellationToken::new();
    ctrlc_cancel(cancel.clone());

    println!(
        "Watching {} every {interval}s. Ctrl+C to stop.",
        paths.inbox.display()
    );
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(pipeline.run_continuous(cancel))?;
    println!("Stopped.");
    Ok(())
}

/// Take the instance lock, or report the holder and return None. Nothing
/// but the lock file's directory is created before the lock is held.
fn acquire(paths: &VaultPaths) -> Result<Option<InstanceLock>> {
    match InstanceLock::acquire(&paths.lock_file) {
        Ok(lock) => Ok(Some(lock)),
        Err(LockError::Held { pid, started_at }) => {
            eprintln!("Another gatehouse instance is running (pid {pid}, started {started_at}). Exiting.");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("locking {}", paths.lock_file.display())),
    }
}

fn build(paths: &VaultPaths, config: GatehouseConfig) -> Result<Pipeline> {
    Pipeline::new(
        paths.clone(),
        config,
        Box::new(RuleClassifier::new()?),
        Arc::new(OutboxPerformer::new(&paths.outbox)),
        Arc::new(SystemClock),
    )
}

fn print_summary(s: &CycleSummary) {
    println!("Processed {} document(s)", s.processed);
    for (label, n) in [
        ("completed", s.completed),
        ("rejected", s.rejected),
        ("timed out", s.timed_out),
        ("quarantined", s.quarantined),
        ("deferred", s.deferred),
        ("duplicates", s.duplicates),
        ("retries released", s.retries_released),
        ("unreadable", s.ingestion_errors),
        ("failed", s.failed),
    ] {
        if n > 0 {
            println!("  {label:<17} {n}");
        }
    }
}

fn ctrlc_cancel(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}
