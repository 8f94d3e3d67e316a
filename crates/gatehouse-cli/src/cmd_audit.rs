use anyhow::Result;
use clap::Subcommand;
use gatehouse_conductor::AuditTrail;
use gatehouse_core::GatehouseConfig;
use gatehouse_store::VaultPaths;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Subcommand)]
pub enum AuditCmd {
    /// Counts by event, status, and failure kind
    Stats {
        /// Window in days
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Most recent failures, newest first
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Every entry for one task, oldest first
    Task { task_id: String },
    /// Drop entries older than the retention period
    Prune {
        /// Defaults to pipeline.audit_retention_days
        #[arg(long)]
        days: Option<u32>,
    },
}

pub fn run(cmd: AuditCmd, paths: &VaultPaths) -> Result<()> {
    let trail = AuditTrail::new(&paths.audit_log);
    match cmd {
        AuditCmd::Stats { days, json } => {
            let stats = trail.stats(days_ago(days))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Audit entries since {}: {}", stats.since, stats.total);
            for (title, counts) in [
                ("By event", &stats.by_event),
                ("By status", &stats.by_status),
                ("By failure kind", &stats.by_failure_kind),
            ] {
                if counts.is_empty() {
                    continue;
                }
                println!("{title}:");
                for (key, n) in counts {
                    println!("  {key:<20} {n}");
                }
            }
            Ok(())
        }
        AuditCmd::Recent { limit } => {
            let failures = trail.recent_failures(limit)?;
            if failures.is_empty() {
                println!("No failures recorded.");
            }
            for e in failures {
                let kind = e
                    .details
                    .get("failure_kind")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!(
                    "{}  {:<18} {:<12} {:<22} {kind}",
                    e.timestamp,
                    e.event.as_str(),
                    e.status,
                    e.task_id.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        AuditCmd::Task { task_id } => {
            let entries = trail.for_task(&task_id)?;
            if entries.is_empty() {
                println!("No audit entries for {task_id}.");
            }
            for e in entries {
                println!(
                    "{}  {:<18} {:<12} {}",
                    e.timestamp,
                    e.event.as_str(),
                    e.status,
                    e.request_id.as_deref().unwrap_or(""),
                );
            }
            Ok(())
        }
        AuditCmd::Prune { days } => {
            let days = match days {
                Some(d) => d,
                None => GatehouseConfig::load(&paths.config_json)?.pipeline.audit_retention_days,
            };
            let removed = trail.prune_older_than(days_ago(days))?;
            println!("Removed {removed} audit entr{} older than {days} days.", if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
    }
}

fn days_ago(days: u32) -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::from_secs(u64::from(days) * 86_400)
}
