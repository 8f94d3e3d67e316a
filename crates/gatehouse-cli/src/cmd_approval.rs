use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use gatehouse_conductor::approval::document;
use gatehouse_conductor::{ApprovalGateway, ApprovalStatus, SystemClock};
use gatehouse_store::VaultPaths;
use std::sync::Arc;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ApprovalCmd {
    /// Open requests awaiting a decision
    List,
    /// Show the status and comments of a request
    Show {
        /// Request ID (file stem under Needs_Approval/)
        id: String,
    },
    /// Record a decision, the same edit a reviewer makes by hand
    Decide {
        id: String,
        decision: Decision,
        /// Comment kept in the audit trail
        #[arg(long)]
        comment: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Decision {
    Approve,
    Reject,
}

impl From<Decision> for ApprovalStatus {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

// ── Dispatch ──

pub fn run(cmd: ApprovalCmd, paths: &VaultPaths) -> Result<()> {
    let gateway = ApprovalGateway::new(paths.clone(), Arc::new(SystemClock));
    match cmd {
        ApprovalCmd::List => list(&gateway),
        ApprovalCmd::Show { id } => show(&gateway, &id),
        ApprovalCmd::Decide {
            id,
            decision,
            comment,
        } => decide(&gateway, &id, decision.into(), comment.as_deref()),
    }
}

// ── Command Implementations ──

fn list(gateway: &ApprovalGateway) -> Result<()> {
    let ids = gateway.pending_requests()?;
    if ids.is_empty() {
        println!("No pending approvals.");
    }
    for id in ids {
        let detail = match gateway.load_record(&id)? {
            Some(r) => format!("{} step {} ({})", r.task_id, r.step_index, r.action),
            None => "(no record)".to_string(),
        };
        println!("{id}  {detail}");
    }
    Ok(())
}

fn show(gateway: &ApprovalGateway, id: &str) -> Result<()> {
    let record = gateway.load_record(id)?;
    let doc_path = gateway.document_path(id);
    if record.is_none() && !doc_path.exists() {
        bail!("unknown approval request: {id}");
    }

    let status = gateway.poll_status(id)?;
    println!("Request {id}");
    println!("  Status:   {status}");
    if let Some(r) = &record {
        println!("  Task:     {}", r.task_id);
        println!("  Step:     {} ({})", r.step_index, r.action);
        println!("  Created:  {}", r.created_at);
        if let Some(at) = &r.decided_at {
            println!("  Decided:  {at}");
        }
        if let Some(path) = &r.final_path {
            println!("  Archived: {path}");
        }
    }

    let comments = match record.as_ref().filter(|r| r.finalized) {
        Some(r) => r.comments.clone(),
        None => std::fs::read_to_string(&doc_path)
            .ok()
            .and_then(|c| document::parse(&c).comments),
    };
    if let Some(comments) = comments {
        println!("  Comments:");
        for line in comments.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

fn decide(
    gateway: &ApprovalGateway,
    id: &str,
    status: ApprovalStatus,
    comment: Option<&str>,
) -> Result<()> {
    gateway.record_decision(id, status, comment)?;
    println!("Recorded {status} for {id}. The pipeline picks it up on its next poll.");
    Ok(())
}
