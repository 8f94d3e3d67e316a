use gatehouse_conductor::status_report;
use gatehouse_store::{LockState, VaultPaths};

/// `gatehouse status`
pub fn execute(paths: &VaultPaths) -> anyhow::Result<()> {
    let report = status_report(paths)?;

    println!("Vault {}", paths.root.display());
    for (stage, count) in &report.stages {
        println!("  {stage:<15} {count}");
    }
    println!("Processed hashes: {}", report.processed);

    if report.pending_approvals.is_empty() {
        println!("Pending approvals: (none)");
    } else {
        println!("Pending approvals:");
        for id in &report.pending_approvals {
            println!("  {id}");
        }
    }

    match &report.lock {
        LockState::Free => println!("Instance lock: free"),
        LockState::Held(info) => println!(
            "Instance lock: held by pid {} since {}",
            info.pid, info.started_at
        ),
        LockState::Stale(info) => println!(
            "Instance lock: stale (pid {} started {} exited without releasing)",
            info.pid, info.started_at
        ),
    }
    Ok(())
}
