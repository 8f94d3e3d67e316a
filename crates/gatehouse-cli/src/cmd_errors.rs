use anyhow::Result;
use clap::Subcommand;
use gatehouse_conductor::quarantine::Quarantine;
use gatehouse_core::GatehouseConfig;
use gatehouse_store::VaultPaths;
use time::OffsetDateTime;

#[derive(Subcommand)]
pub enum ErrorsCmd {
    /// Quarantined documents and their retry state
    List,
    /// Remove dated quarantine directories older than N days
    Prune {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

pub fn run(cmd: ErrorsCmd, paths: &VaultPaths) -> Result<()> {
    let config = GatehouseConfig::load(&paths.config_json)?;
    let quarantine = Quarantine::new(&paths.errors, config.quarantine_retry_delay());
    match cmd {
        ErrorsCmd::List => {
            let records = quarantine.list()?;
            if records.is_empty() {
                println!("Quarantine is empty.");
            }
            for (_, r) in records {
                let retry = if r.retry_attempted {
                    "retried".to_string()
                } else if r.retry_eligible {
                    format!("retry after {}", r.retry_not_before.as_deref().unwrap_or("?"))
                } else {
                    "no retry".to_string()
                };
                println!(
                    "{}  {:<15} {}  [{retry}]",
                    r.timestamp, r.failure_kind, r.quarantined_path
                );
                println!("    {}", r.message);
            }
            Ok(())
        }
        ErrorsCmd::Prune { days } => {
            let removed = quarantine.prune_older_than(days, OffsetDateTime::now_utc())?;
            println!("Removed {removed} quarantine director{}.", if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
    }
}
