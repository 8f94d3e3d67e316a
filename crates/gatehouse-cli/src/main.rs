mod cmd_approval;
mod cmd_audit;
mod cmd_config;
mod cmd_errors;
mod cmd_pipeline;
mod cmd_status;
mod outbox;

use clap::{Parser, Subcommand};
use gatehouse_store::VaultPaths;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatehouse", version, about = "Human-gated task pipeline over a directory vault")]
struct Cli {
    /// Vault root (the directory holding Inbox/, Needs_Approval/, Logs/, ...)
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process whatever is waiting in the inbox, then exit
    Once {
        #[command(flatten)]
        overrides: cmd_pipeline::Overrides,
    },
    /// Process the inbox every cycle until Ctrl+C
    Run {
        #[command(flatten)]
        overrides: cmd_pipeline::Overrides,
        /// Seconds between cycles (minimum 60)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show document counts per stage, pending approvals, and lock state
    Status,
    /// Inspect and decide approval requests
    Approval {
        #[command(subcommand)]
        cmd: cmd_approval::ApprovalCmd,
    },
    /// Audit log statistics and maintenance
    Audit {
        #[command(subcommand)]
        cmd: cmd_audit::AuditCmd,
    },
    /// Quarantined documents
    Errors {
        #[command(subcommand)]
        cmd: cmd_errors::ErrorsCmd,
    },
    /// Effective configuration
    Config {
        #[command(subcommand)]
        cmd: cmd_config::ConfigCmd,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let paths = VaultPaths::discover(&cli.vault);

    match cli.cmd {
        Command::Once { overrides } => cmd_pipeline::once(&paths, &overrides),
        Command::Run {
            overrides,
            interval_secs,
        } => cmd_pipeline::run(&paths, &overrides, interval_secs),
        Command::Status => cmd_status::execute(&paths),
        Command::Approval { cmd } => cmd_approval::run(cmd, &paths),
        Command::Audit { cmd } => cmd_audit::run(cmd, &paths),
        Command::Errors { cmd } => cmd_errors::run(cmd, &paths),
        Command::Config { cmd } => cmd_config::run(cmd, &paths),
    }
}
