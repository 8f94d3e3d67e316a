//! The orchestrating loop: drives each inbox document through
//! classify → plan → (approve) → execute → finalize.
//!
//! The loop is the only writer that moves task documents between vault
//! directories. Every run has a durable state file under `Logs/runs/`, so a
//! run interrupted by a crash or a deferred approval resumes where it stopped.

use crate::approval::document::append_footer;
use crate::approval::{request_id_for, ApprovalGateway, ApprovalRequest, ApprovalStatus};
use crate::audit::{AuditEntry, AuditEvent, AuditTrail};
use crate::clock::{Clock, SystemClock};
use crate::dashboard::Dashboard;
use crate::failure::FailureKind;
use crate::quarantine::{FailureContext, Quarantine, QuarantineRecord};
use crate::runner::{ActionPerformer, RetryingExecutor};
use crate::state::machine::StepFailure;
use crate::state::{load_run, save_run, transition, RunState, RunStatus, StepUpdate};
use anyhow::{Context, Result};
use gatehouse_core::hash::{sha256_hex, task_id_for};
use gatehouse_core::{
    build_plan, render_plan_markdown, Classification, Classifier, GatehouseConfig, RiskLevel,
    Step, StepStatus,
};
use gatehouse_store::paths::count_documents;
use gatehouse_store::{
    format_rfc3339, move_into, parse_rfc3339, unique_path, write_atomic, IdempotencyTracker,
    InstanceLock, LockState, VaultPaths,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How one task document left a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Rejected,
    TimedOut,
    Quarantined,
    Duplicate,
    /// Waiting on a human decision; resumed next cycle.
    Deferred,
    IngestionFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub processed: usize,
    pub completed: usize,
    pub rejected: usize,
    pub timed_out: usize,
    pub quarantined: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub retries_released: usize,
    pub ingestion_errors: usize,
    /// Documents whose processing hit a system error; left in place.
    pub failed: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.completed += 1,
            TaskOutcome::Rejected => self.rejected += 1,
            TaskOutcome::TimedOut => self.timed_out += 1,
            TaskOutcome::Quarantined => self.quarantined += 1,
            TaskOutcome::Duplicate => self.duplicates += 1,
            TaskOutcome::Deferred => self.deferred += 1,
            TaskOutcome::IngestionFailed => self.ingestion_errors += 1,
        }
    }
}

pub struct Pipeline {
    paths: VaultPaths,
    config: GatehouseConfig,
    classifier: Box<dyn Classifier>,
    performer: Arc<dyn ActionPerformer>,
    clock: Arc<dyn Clock>,
    tracker: IdempotencyTracker,
    audit: AuditTrail,
    gateway: ApprovalGateway,
    executor: RetryingExecutor,
    quarantine: Quarantine,
    dashboard: Dashboard,
    reported_duplicates: HashSet<String>,
    reported_unreadable: HashSet<PathBuf>,
}

impl Pipeline {
    pub fn new(
        paths: VaultPaths,
        config: GatehouseConfig,
        classifier: Box<dyn Classifier>,
        performer: Arc<dyn ActionPerformer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        paths
            .ensure_layout()
            .with_context(|| format!("creating vault layout under {}", paths.root.display()))?;
        Ok(Self {
            tracker: IdempotencyTracker::load(&paths.processed_json),
            audit: AuditTrail::new(&paths.audit_log),
            gateway: ApprovalGateway::new(paths.clone(), clock.clone()),
            executor: RetryingExecutor::from_config(&config.retry, clock.clone()),
            quarantine: Quarantine::new(&paths.errors, config.quarantine_retry_delay()),
            dashboard: Dashboard::new(&paths.dashboard),
            reported_duplicates: HashSet::new(),
            reported_unreadable: HashSet::new(),
            paths,
            config,
            classifier,
            performer,
            clock,
        })
    }

    /// Replace the executor (tests use a seeded backoff).
    pub fn with_executor(mut self, executor: RetryingExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Single pass: release due retries, then process every inbox document.
    /// A failure on one document is logged and never stops the others.
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let mut summary = CycleSummary {
            retries_released: self.release_due_retries(),
            ..Default::default()
        };

        let docs = self
            .paths
            .inbox_tasks()
            .with_context(|| format!("listing {}", self.paths.inbox.display()))?;
        for doc in docs {
            if cancel.is_cancelled() {
                tracing::info!("cancelled, stopping cycle early");
                break;
            }
            summary.processed += 1;
            match self.process_task(&doc, cancel).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(doc = %doc.display(), error = %format!("{e:#}"), "task processing failed");
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            completed = summary.completed,
            rejected = summary.rejected,
            timed_out = summary.timed_out,
            quarantined = summary.quarantined,
            deferred = summary.deferred,
            duplicates = summary.duplicates,
            "cycle finished"
        );
        Ok(summary)
    }

    /// Repeat `run_once` every cycle interval until cancelled. A failed cycle
    /// is logged and the next one retries from scratch.
    pub async fn run_continuous(&mut self, cancel: CancellationToken) -> Result<()> {
        let interval = self.config.cycle_interval();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_once(&cancel).await {
                tracing::error!(error = %format!("{e:#}"), "cycle aborted");
            }
            let clock = self.clock.clone();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = clock.sleep(interval) => {}
            }
        }
        tracing::info!("continuous run stopped");
        Ok(())
    }

    async fn process_task(
        &mut self,
        doc: &Path,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let file_name = file_name_of(doc);
        let bytes = match std::fs::read(doc) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(doc = %doc.display(), error = %e, "cannot read task document, leaving in place");
                if self.reported_unreadable.insert(doc.to_path_buf()) {
                    self.audit.record(
                        AuditEntry::new(self.clock.now(), AuditEvent::IngestionFailed, "failed")
                            .detail("file", file_name.as_str())
                            .detail("error", e.to_string()),
                    );
                }
                return Ok(TaskOutcome::IngestionFailed);
            }
        };
        let hash = sha256_hex(&bytes);
        let task_id = task_id_for(&hash);
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let existing = load_run(&self.paths.runs_dir, &task_id)?;
        let run = if self.tracker.is_processed(&hash) {
            match existing {
                Some(run) if !run.status.is_terminal() => {
                    tracing::info!(task_id = %task_id, status = ?run.status, "resuming run");
                    run
                }
                _ => return Ok(self.skip_duplicate(&file_name, &task_id, &hash)),
            }
        } else if let Some(run) = existing {
            // Run state saved but the hash never recorded: a crash in between.
            self.tracker
                .mark_processed(&hash, processed_metadata(&run))
                .context("recording processed hash")?;
            if run.status.is_terminal() {
                return Ok(self.skip_duplicate(&file_name, &task_id, &hash));
            }
            run
        } else {
            self.ingest(&file_name, &hash, &task_id, &text)?
        };

        self.drive(doc, &text, run, cancel).await
    }

    fn skip_duplicate(&mut self, file_name: &str, task_id: &str, hash: &str) -> TaskOutcome {
        if self.reported_duplicates.insert(hash.to_string()) {
            tracing::info!(task_id, file = file_name, "duplicate content, skipping");
            self.audit.record(
                AuditEntry::new(self.clock.now(), AuditEvent::DuplicateSkipped, "skipped")
                    .task(task_id)
                    .detail("file", file_name)
                    .detail("content_hash", hash),
            );
        }
        TaskOutcome::Duplicate
    }

    /// Classify, build and persist the plan, then admit the hash.
    fn ingest(&mut self, file_name: &str, hash: &str, task_id: &str, text: &str) -> Result<RunState> {
        self.audit.record(
            AuditEntry::new(self.clock.now(), AuditEvent::TaskIngested, "ok")
                .task(task_id)
                .detail("file", file_name)
                .detail("content_hash", hash),
        );

        let classification = match self.classifier.classify(text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(task_id, error = %format!("{e:#}"), "classification failed, using general/low");
                Classification::fallback()
            }
        };
        tracing::info!(
            task_id,
            task_type = %classification.task_type,
            risk = %classification.risk_level,
            "classified"
        );
        self.audit.record(
            AuditEntry::new(self.clock.now(), AuditEvent::TaskClassified, "ok")
                .task(task_id)
                .detail("task_type", classification.task_type.as_str())
                .detail("risk_level", classification.risk_level.as_str())
                .detail("urgent", classification.urgent)
                .detail("keywords", classification.keywords.clone()),
        );

        let plan = build_plan(&classification);
        let now = self.now();
        let plan_path = self.paths.plans.join(format!("Plan_{task_id}.md"));
        let rendered = render_plan_markdown(task_id, file_name, &now, &classification, &plan);
        write_atomic(&plan_path, rendered.as_bytes())
            .with_context(|| format!("writing plan: {}", plan_path.display()))?;

        let run = RunState::new(task_id, hash, file_name, classification, plan, &now);
        save_run(&self.paths.runs_dir, &run)?;
        self.tracker
            .mark_processed(hash, processed_metadata(&run))
            .context("recording processed hash")?;

        self.audit.record(
            AuditEntry::new(self.clock.now(), AuditEvent::PlanCreated, "ok")
                .task(task_id)
                .detail("plan", plan_path.display().to_string())
                .detail("steps", run.plan.steps.len())
                .detail("risky_steps", run.plan.risky_steps().count()),
        );
        Ok(run)
    }

    /// Run the plan's remaining steps in order.
    async fn drive(
        &self,
        doc: &Path,
        text: &str,
        mut run: RunState,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let indexes: Vec<usize> = run.plan.steps.iter().map(|s| s.index).collect();
        for &index in &indexes {
            if transition(&mut run, index, StepStatus::InProgress, StepStatus::Pending, None)? {
                tracing::warn!(task_id = %run.task_id, step = index, "step was interrupted, re-running");
            }
        }
        if run.status != RunStatus::Running {
            run.set_status(RunStatus::Running, &self.now());
        }
        save_run(&self.paths.runs_dir, &run)?;

        for index in indexes {
            let step = run.plan.steps[index - 1].clone();
            match step.status {
                StepStatus::Completed | StepStatus::Skipped => continue,
                StepStatus::Failed => {
                    tracing::warn!(task_id = %run.task_id, step = index, "failed step in a live run, re-running");
                    transition(&mut run, index, StepStatus::Failed, StepStatus::Pending, None)?;
                }
                StepStatus::Pending | StepStatus::InProgress => {}
            }

            if step.risky && run.progress(index)?.approval != Some(ApprovalStatus::Approved) {
                match self.gate(&mut run, &step, text, cancel).await? {
                    ApprovalStatus::Approved => {}
                    ApprovalStatus::Pending => {
                        tracing::info!(task_id = %run.task_id, step = index, "approval still pending, deferring");
                        return Ok(TaskOutcome::Deferred);
                    }
                    ApprovalStatus::Rejected => return self.finish_rejected(doc, run),
                    ApprovalStatus::Timeout => return self.finish_timed_out(doc, run),
                }
            }

            if run.iterations >= self.config.pipeline.max_iterations {
                let message = format!(
                    "iteration ceiling of {} reached before step {index}",
                    self.config.pipeline.max_iterations
                );
                return self.finish_quarantined(doc, run, Some(&step), FailureKind::IterationLimit, message, 0);
            }
            run.iterations += 1;

            let previous_attempts = run.progress(index)?.attempts;
            transition(
                &mut run,
                index,
                StepStatus::Pending,
                StepStatus::InProgress,
                Some(StepUpdate {
                    started_at: Some(self.now()),
                    ..Default::default()
                }),
            )?;
            save_run(&self.paths.runs_dir, &run)?;

            let payload = step_payload(&run, &step);
            let result = self
                .executor
                .execute(&step, run.classification.risk_level, &payload, self.performer.as_ref())
                .await;
            match result {
                Ok(success) => {
                    transition(
                        &mut run,
                        index,
                        StepStatus::InProgress,
                        StepStatus::Completed,
                        Some(StepUpdate {
                            completed_at: Some(self.now()),
                            attempts: Some(previous_attempts + success.attempts),
                            ..Default::default()
                        }),
                    )?;
                    save_run(&self.paths.runs_dir, &run)?;
                    tracing::info!(task_id = %run.task_id, step = index, action = %step.action, "step completed");
                    self.audit.record(
                        AuditEntry::new(self.clock.now(), AuditEvent::StepExecuted, "ok")
                            .task(&run.task_id)
                            .detail("step", index)
                            .detail("action", step.action.as_str())
                            .detail("attempts", success.attempts),
                    );
                }
                Err(err) => {
                    let kind = err.kind();
                    let message = err.to_string();
                    transition(
                        &mut run,
                        index,
                        StepStatus::InProgress,
                        StepStatus::Failed,
                        Some(StepUpdate {
                            attempts: Some(previous_attempts + err.attempts()),
                            error: Some(StepFailure {
                                kind,
                                message: message.clone(),
                                timestamp: self.now(),
                            }),
                            ..Default::default()
                        }),
                    )?;
                    tracing::warn!(task_id = %run.task_id, step = index, kind = %kind, error = %message, "step failed");
                    self.audit.record(
                        AuditEntry::new(self.clock.now(), AuditEvent::StepFailed, "failed")
                            .task(&run.task_id)
                            .detail("step", index)
                            .detail("action", step.action.as_str())
                            .detail("failure_kind", kind.as_str())
                            .detail("attempts", err.attempts())
                            .detail("error", message.as_str()),
                    );
                    return self.finish_quarantined(doc, run, Some(&step), kind, message, err.attempts());
                }
            }
        }

        self.finish_completed(doc, run)
    }

    /// Request (or re-use) the approval for a risky step and wait for it.
    async fn gate(
        &self,
        run: &mut RunState,
        step: &Step,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ApprovalStatus> {
        let request_id = request_id_for(&run.task_id, step.index);
        let record = match self.gateway.load_record(&request_id)? {
            Some(record) => record,
            None => {
                let payload = Value::Object(step_payload(run, step));
                let record = self.gateway.create_request(&ApprovalRequest {
                    request_id: &request_id,
                    task_id: &run.task_id,
                    step,
                    risk_level: run.classification.risk_level,
                    payload: &payload,
                    task_text: text,
                    timeout: self.config.approval_timeout(),
                })?;
                self.audit.record(
                    AuditEntry::new(self.clock.now(), AuditEvent::ApprovalRequested, "pending")
                        .task(&run.task_id)
                        .request(&request_id)
                        .detail("step", step.index)
                        .detail("action", step.action.as_str())
                        .detail("document", record.document.as_str()),
                );
                record
            }
        };

        run.progress_mut(step.index)?.request_id = Some(request_id.clone());
        run.set_status(RunStatus::AwaitingApproval, &self.now());
        save_run(&self.paths.runs_dir, run)?;

        let status = if record.finalized {
            record.status
        } else {
            self.gateway
                .wait_for_decision(
                    &request_id,
                    self.remaining_wait(&record.created_at),
                    self.config.poll_interval(),
                    cancel,
                )
                .await?
        };
        if status == ApprovalStatus::Pending {
            return Ok(status);
        }

        let finalized = self.gateway.finalize(&request_id, status)?;
        if !record.finalized {
            let mut entry = AuditEntry::new(
                self.clock.now(),
                AuditEvent::ApprovalDecided,
                status.as_str().to_ascii_lowercase(),
            )
            .task(&run.task_id)
            .request(&request_id)
            .detail("step", step.index);
            if let Some(comments) = finalized.comments.as_deref() {
                entry = entry.detail("comments", comments);
            }
            if let Some(path) = finalized.final_path.as_deref() {
                entry = entry.detail("final_path", path);
            }
            self.audit.record(entry);
        }

        run.progress_mut(step.index)?.approval = Some(status);
        run.set_status(RunStatus::Running, &self.now());
        save_run(&self.paths.runs_dir, run)?;
        Ok(status)
    }

    fn finish_completed(&self, doc: &Path, mut run: RunState) -> Result<TaskOutcome> {
        let dest = move_into(doc, &self.paths.done, &file_name_of(doc))?;
        run.final_path = Some(dest.display().to_string());
        run.set_status(RunStatus::Completed, &self.now());
        save_run(&self.paths.runs_dir, &run)?;

        tracing::info!(task_id = %run.task_id, "task completed");
        self.activity(&run, "completed");
        self.audit.record(
            AuditEntry::new(self.clock.now(), AuditEvent::TaskCompleted, "ok")
                .task(&run.task_id)
                .detail("final_path", dest.display().to_string()),
        );
        Ok(TaskOutcome::Completed)
    }

    fn finish_rejected(&self, doc: &Path, mut run: RunState) -> Result<TaskOutcome> {
        run.skip_remaining("approval rejected")?;
        let dest = move_into(doc, &self.paths.rejected, &file_name_of(doc))?;
        run.final_path = Some(dest.display().to_string());
        run.set_status(RunStatus::Rejected, &self.now());
        save_run(&self.paths.runs_dir, &run)?;

        tracing::info!(task_id = %run.task_id, "task rejected");
        self.activity(&run, "rejected");
        self.audit.record(
            AuditEntry::new(self.clock.now(), AuditEvent::TaskRejected, "rejected")
                .task(&run.task_id)
                .detail("final_path", dest.display().to_string()),
        );
        Ok(TaskOutcome::Rejected)
    }

    /// The finalized decision document quotes the task and is back in the
    /// inbox for re-triage, so the original document is retired. If the
    /// decision document was gone, the original itself goes back instead.
    fn finish_timed_out(&self, doc: &Path, mut run: RunState) -> Result<TaskOutcome> {
        run.skip_remaining("approval timed out")?;
        let request = run
            .progress
            .iter()
            .rev()
            .find_map(|p| p.request_id.clone());
        let finalized = match &request {
            Some(id) => self.gateway.load_record(id)?.and_then(|r| r.final_path),
            None => None,
        };
        let retriage = match finalized {
            Some(path) if Path::new(&path).starts_with(&self.paths.inbox) => {
                remove_if_exists(doc)?;
                Some(path)
            }
            _ => self.requeue_for_retriage(doc, &run.task_id)?,
        };
        run.final_path = retriage.clone();
        run.set_status(RunStatus::TimedOut, &self.now());
        save_run(&self.paths.runs_dir, &run)?;

        tracing::warn!(task_id = %run.task_id, "approval timed out, task returned to inbox");
        self.activity(&run, "timed out");
        let mut entry = AuditEntry::new(self.clock.now(), AuditEvent::TaskTimedOut, "timeout")
            .task(&run.task_id);
        if let Some(id) = request.as_deref() {
            entry = entry.request(id);
        }
        if let Some(path) = retriage {
            entry = entry.detail("final_path", path);
        }
        self.audit.record(entry);
        Ok(TaskOutcome::TimedOut)
    }

    /// Rewrite the original document as `timeout_<name>` with a footer, so it
    /// is re-triaged under a new hash.
    fn requeue_for_retriage(&self, doc: &Path, task_id: &str) -> Result<Option<String>> {
        let content = match std::fs::read(doc) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(task_id, doc = %doc.display(), "task document gone at timeout");
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", doc.display())),
        };
        let dest = unique_path(&self.paths.inbox, &format!("timeout_{}", file_name_of(doc)));
        let body = append_footer(&content, ApprovalStatus::Timeout, &self.now());
        write_atomic(&dest, body.as_bytes())
            .with_context(|| format!("writing {}", dest.display()))?;
        remove_if_exists(doc)?;
        tracing::info!(task_id, dest = %dest.display(), "decision document missing, original requeued");
        Ok(Some(dest.display().to_string()))
    }

    fn finish_quarantined(
        &self,
        doc: &Path,
        mut run: RunState,
        step: Option<&Step>,
        kind: FailureKind,
        message: String,
        attempts: u32,
    ) -> Result<TaskOutcome> {
        let allow_retry = !run.retried && run.classification.risk_level != RiskLevel::Critical;
        let record = self.quarantine.quarantine(
            doc,
            FailureContext {
                task_id: Some(run.task_id.clone()),
                step_index: step.map(|s| s.index),
                action: step.map(|s| s.action.clone()),
                failure_kind: kind,
                message,
                attempts,
                allow_retry,
            },
            self.clock.now(),
        )?;
        run.quarantine_id = Some(record.error_id.clone());
        run.final_path = Some(record.quarantined_path.clone());
        run.set_status(RunStatus::Quarantined, &self.now());
        save_run(&self.paths.runs_dir, &run)?;

        self.activity(&run, "quarantined");
        let mut entry = AuditEntry::new(self.clock.now(), AuditEvent::TaskQuarantined, "quarantined")
            .task(&run.task_id)
            .detail("failure_kind", kind.as_str())
            .detail("error_id", record.error_id.as_str())
            .detail("message", record.message.as_str())
            .detail("retry_eligible", record.retry_eligible)
            .detail("final_path", record.quarantined_path.as_str());
        if let Some(at) = record.retry_not_before.as_deref() {
            entry = entry.detail("retry_not_before", at);
        }
        self.audit.record(entry);
        Ok(TaskOutcome::Quarantined)
    }

    /// Move every due quarantine entry back to the inbox, once.
    fn release_due_retries(&self) -> usize {
        let now = self.clock.now();
        let due = match self.quarantine.due_retries(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "listing quarantine failed");
                return 0;
            }
        };
        let mut released = 0;
        for (meta_path, record) in due {
            match self.release(&meta_path, record) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(meta = %meta_path.display(), error = %format!("{e:#}"), "releasing retry failed")
                }
            }
        }
        released
    }

    fn release(&self, meta_path: &Path, mut record: QuarantineRecord) -> Result<bool> {
        // Reset the run first so a crash mid-release leaves it resumable.
        if let Some(task_id) = record.task_id.as_deref() {
            if let Some(mut run) = load_run(&self.paths.runs_dir, task_id)? {
                if let Some(index) = run.failed_step() {
                    transition(&mut run, index, StepStatus::Failed, StepStatus::Pending, None)?;
                }
                run.retried = true;
                run.iterations = 0;
                run.quarantine_id = None;
                run.final_path = None;
                run.set_status(RunStatus::Running, &self.now());
                save_run(&self.paths.runs_dir, &run)?;
            }
        }

        let quarantined = PathBuf::from(&record.quarantined_path);
        let moved = if quarantined.exists() {
            Some(move_into(&quarantined, &self.paths.inbox, &record.original_name)?)
        } else {
            tracing::warn!(error_id = %record.error_id, "quarantined document missing, not releasing");
            None
        };
        record.retry_attempted = true;
        self.quarantine.save(meta_path, &record)?;

        let Some(dest) = moved else {
            return Ok(false);
        };
        tracing::info!(error_id = %record.error_id, dest = %dest.display(), "scheduled retry released");
        let mut entry = AuditEntry::new(self.clock.now(), AuditEvent::RetryReleased, "ok")
            .detail("error_id", record.error_id.as_str())
            .detail("path", dest.display().to_string());
        if let Some(task_id) = record.task_id.as_deref() {
            entry = entry.task(task_id);
        }
        self.audit.record(entry);
        Ok(true)
    }

    fn activity(&self, run: &RunState, verb: &str) {
        let line = format!("{} {verb} {} ({})", self.now(), run.task_id, run.source_file);
        if let Err(e) = self.dashboard.record(&line) {
            tracing::warn!(error = %format!("{e:#}"), "dashboard update failed");
        }
    }

    fn now(&self) -> String {
        format_rfc3339(self.clock.now())
    }

    /// What is left of the approval window opened at `created_at`.
    fn remaining_wait(&self, created_at: &str) -> Duration {
        let timeout = self.config.approval_timeout();
        match parse_rfc3339(created_at) {
            Some(created) => {
                let elapsed = Duration::try_from(self.clock.now() - created).unwrap_or(Duration::ZERO);
                timeout.saturating_sub(elapsed)
            }
            None => timeout,
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

fn file_name_of(doc: &Path) -> String {
    doc.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("task.md")
        .to_string()
}

fn processed_metadata(run: &RunState) -> Value {
    json!({
        "task_id": run.task_id,
        "source": run.source_file,
        "task_type": run.classification.task_type.as_str(),
    })
}

/// Payload handed to the performer and shown in the decision document.
fn step_payload(run: &RunState, step: &Step) -> Map<String, Value> {
    let c = &run.classification;
    let mut payload = Map::new();
    payload.insert("task_id".into(), json!(run.task_id));
    payload.insert("step".into(), json!(step.index));
    payload.insert("action".into(), json!(step.action));
    payload.insert("description".into(), json!(step.description));
    payload.insert("task_type".into(), json!(c.task_type.as_str()));
    payload.insert("risk_level".into(), json!(c.risk_level.as_str()));
    payload.insert("summary".into(), json!(c.summary));
    payload.insert(
        "entities".into(),
        serde_json::to_value(&c.entities).unwrap_or(Value::Null),
    );
    payload.insert("source".into(), json!(run.source_file));
    payload
}

// ── Status report ──

/// Read-only snapshot of a vault.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub stages: Vec<(&'static str, usize)>,
    pub processed: usize,
    pub pending_approvals: Vec<String>,
    pub lock: LockState,
}

pub fn status_report(paths: &VaultPaths) -> Result<StatusReport> {
    let stages = paths
        .stage_dirs()
        .iter()
        .map(|(name, dir)| (*name, count_documents(dir)))
        .collect();
    let gateway = ApprovalGateway::new(paths.clone(), Arc::new(SystemClock));
    let lock = InstanceLock::inspect(&paths.lock_file)
        .with_context(|| format!("inspecting {}", paths.lock_file.display()))?;
    Ok(StatusReport {
        stages,
        processed: IdempotencyTracker::load(&paths.processed_json).len(),
        pending_approvals: gateway.pending_requests()?,
        lock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::document;
    use crate::clock::ManualClock;
    use crate::runner::{ActionOutcome, BackoffPolicy, MockPerformer};
    use gatehouse_core::{RuleClassifier, TaskType};
    use gatehouse_store::paths::list_documents;
    use std::time::Duration;
    use time::OffsetDateTime;

    const WIRE: &str = "Please wire $5,000 to vendor ABC by Friday";
    const WEATHER: &str = "Draft a note about the weather";

    /// Virtual clock that plays a reviewer: every sleep marks each open
    /// decision document with `decision`.
    struct ReviewerClock {
        inner: ManualClock,
        needs_approval: PathBuf,
        decision: ApprovalStatus,
    }

    #[async_trait::async_trait]
    impl Clock for ReviewerClock {
        fn now(&self) -> OffsetDateTime {
            self.inner.now()
        }

        async fn sleep(&self, duration: Duration) {
            for doc in list_documents(&self.needs_approval).unwrap() {
                let content = std::fs::read_to_string(&doc).unwrap();
                let comment = (self.decision == ApprovalStatus::Rejected).then_some("budget not approved");
                let edited = document::set_decision(&content, self.decision, comment).unwrap();
                std::fs::write(&doc, edited).unwrap();
            }
            self.inner.sleep(duration).await;
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        paths: VaultPaths,
        performer: Arc<MockPerformer>,
        pipeline: Pipeline,
    }

    fn harness_with(
        clock: impl FnOnce(&VaultPaths) -> Arc<dyn Clock>,
        config: GatehouseConfig,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = VaultPaths::discover(dir.path());
        let clock = clock(&paths);
        let performer = Arc::new(MockPerformer::new());
        let executor = RetryingExecutor::new(
            config.retry.max_retries,
            BackoffPolicy::from_config(&config.retry).with_seed(7),
            clock.clone(),
        );
        let pipeline = Pipeline::new(
            paths.clone(),
            config,
            Box::new(RuleClassifier::new().unwrap()),
            performer.clone(),
            clock,
        )
        .unwrap()
        .with_executor(executor);
        Harness {
            _dir: dir,
            paths,
            performer,
            pipeline,
        }
    }

    fn harness() -> (Harness, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let shared: Arc<dyn Clock> = clock.clone();
        let h = harness_with(move |_| shared, GatehouseConfig::default());
        (h, clock)
    }

    fn reviewer(decision: ApprovalStatus) -> Harness {
        harness_with(
            move |paths| {
                let clock: Arc<dyn Clock> = Arc::new(ReviewerClock {
                    inner: ManualClock::at_epoch(),
                    needs_approval: paths.needs_approval.clone(),
                    decision,
                });
                clock
            },
            GatehouseConfig::default(),
        )
    }

    /// Virtual clock under which decision documents vanish from
    /// `Needs_Approval` while the loop waits.
    struct DiscardingClock {
        inner: ManualClock,
        needs_approval: PathBuf,
    }

    #[async_trait::async_trait]
    impl Clock for DiscardingClock {
        fn now(&self) -> OffsetDateTime {
            self.inner.now()
        }

        async fn sleep(&self, duration: Duration) {
            for doc in list_documents(&self.needs_approval).unwrap() {
                std::fs::remove_file(doc).unwrap();
            }
            self.inner.sleep(duration).await;
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _text: &str) -> Result<Classification> {
            anyhow::bail!("rule table unavailable")
        }
    }

    /// A fresh pipeline over the same vault, as after a process restart.
    fn restart(h: &mut Harness, classifier: Box<dyn Classifier>, clock: Arc<dyn Clock>) {
        h.pipeline = Pipeline::new(
            h.paths.clone(),
            GatehouseConfig::default(),
            classifier,
            h.performer.clone(),
            clock,
        )
        .unwrap();
    }

    fn count_events(paths: &VaultPaths, event: AuditEvent) -> usize {
        events(paths).into_iter().filter(|e| *e == event).count()
    }

    fn drop_task(paths: &VaultPaths, name: &str, text: &str) -> PathBuf {
        let path = paths.inbox.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn events(paths: &VaultPaths) -> Vec<AuditEvent> {
        AuditTrail::new(&paths.audit_log)
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    fn dashboard_entries(paths: &VaultPaths) -> usize {
        std::fs::read_to_string(&paths.dashboard)
            .unwrap_or_default()
            .lines()
            .filter(|l| l.starts_with("- "))
            .count()
    }

    fn only_run(paths: &VaultPaths) -> RunState {
        let entries: Vec<_> = std::fs::read_dir(&paths.runs_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        serde_json::from_str(&std::fs::read_to_string(&entries[0]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn weather_task_runs_without_approval() {
        let (mut h, _clock) = harness();
        drop_task(&h.paths, "weather.md", WEATHER);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.completed, 1);

        let run = only_run(&h.paths);
        assert_eq!(run.classification.task_type, TaskType::General);
        assert_eq!(run.classification.risk_level, RiskLevel::Low);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.plan.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(h.performer.calls().len(), 5);

        assert!(h.paths.done.join("weather.md").exists());
        assert!(list_documents(&h.paths.inbox).unwrap().is_empty());
        assert!(list_documents(&h.paths.needs_approval).unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&h.paths.approvals_dir).unwrap().count(), 0);
        assert!(!events(&h.paths).contains(&AuditEvent::ApprovalRequested));
        assert_eq!(events(&h.paths).last(), Some(&AuditEvent::TaskCompleted));
    }

    #[tokio::test]
    async fn same_content_twice_builds_one_plan() {
        let (mut h, _clock) = harness();
        drop_task(&h.paths, "weather.md", WEATHER);
        h.pipeline.run_once(&CancellationToken::new()).await.unwrap();

        drop_task(&h.paths, "weather-copy.md", WEATHER);
        let second = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.completed, 0);
        // logged once, not every cycle
        h.pipeline.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(list_documents(&h.paths.plans).unwrap().len(), 1);
        assert_eq!(dashboard_entries(&h.paths), 1);
        assert_eq!(h.performer.calls().len(), 5);
        assert!(h.paths.inbox.join("weather-copy.md").exists());
        let dupes = events(&h.paths)
            .iter()
            .filter(|e| **e == AuditEvent::DuplicateSkipped)
            .count();
        assert_eq!(dupes, 1);
    }

    #[tokio::test]
    async fn rejected_wire_transfer() {
        let mut h = reviewer(ApprovalStatus::Rejected);
        drop_task(&h.paths, "wire.md", WIRE);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.rejected, 1);

        let run = only_run(&h.paths);
        assert_eq!(run.classification.task_type, TaskType::Financial);
        assert_eq!(run.classification.risk_level, RiskLevel::High);
        let transfer = &run.plan.steps[3];
        assert_eq!(transfer.action, "transfer_funds");
        assert!(transfer.risky);
        assert_eq!(transfer.status, StepStatus::Skipped);
        assert_eq!(run.progress[3].approval, Some(ApprovalStatus::Rejected));
        assert_eq!(h.performer.call_count("transfer_funds"), 0);

        assert!(h.paths.rejected.join("wire.md").exists());
        let request_id = request_id_for(&run.task_id, 4);
        assert!(h
            .paths
            .rejected
            .join(format!("rejected_{request_id}.md"))
            .exists());
        assert!(list_documents(&h.paths.needs_approval).unwrap().is_empty());

        let order = [
            AuditEvent::TaskIngested,
            AuditEvent::TaskClassified,
            AuditEvent::PlanCreated,
            AuditEvent::ApprovalRequested,
            AuditEvent::ApprovalDecided,
        ];
        let seen: Vec<_> = events(&h.paths)
            .into_iter()
            .filter(|e| order.contains(e))
            .collect();
        assert_eq!(seen, order);

        let decided = AuditTrail::new(&h.paths.audit_log)
            .read_all()
            .unwrap()
            .into_iter()
            .find(|e| e.event == AuditEvent::ApprovalDecided)
            .unwrap();
        assert_eq!(decided.status, "rejected");
        assert_eq!(decided.details["comments"], "budget not approved");
        assert_eq!(decided.request_id.as_deref(), Some(request_id.as_str()));
    }

    #[tokio::test]
    async fn approved_wire_transfer_executes() {
        let mut h = reviewer(ApprovalStatus::Approved);
        drop_task(&h.paths, "wire.md", WIRE);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(h.performer.call_count("transfer_funds"), 1);
        assert!(h.paths.done.join("wire.md").exists());
        assert_eq!(
            list_documents(&h.paths.approved).unwrap().len(),
            1,
            "decision document archived under Approved"
        );
    }

    #[tokio::test]
    async fn unanswered_approval_times_out_to_inbox() {
        let (mut h, clock) = harness();
        drop_task(&h.paths, "wire.md", WIRE);
        let start = clock.now();

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert!((clock.now() - start).unsigned_abs() >= Duration::from_secs(3600));

        let run = only_run(&h.paths);
        assert_eq!(run.status, RunStatus::TimedOut);
        assert_eq!(h.performer.call_count("transfer_funds"), 0);
        assert!(!h.paths.inbox.join("wire.md").exists());

        let inbox = list_documents(&h.paths.inbox).unwrap();
        assert_eq!(inbox.len(), 1);
        let name = inbox[0].file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("timeout_"), "{name}");
        assert_eq!(run.final_path.as_deref(), Some(inbox[0].display().to_string().as_str()));
        assert_eq!(events(&h.paths).last(), Some(&AuditEvent::TaskTimedOut));
    }

    #[tokio::test]
    async fn deferred_approval_resumes_without_repeating_work() {
        let (mut h, _clock) = harness();
        let doc = drop_task(&h.paths, "wire.md", WIRE);
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        let outcome = h.pipeline.process_task(&doc, &cancelled).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Deferred);
        let run = only_run(&h.paths);
        assert_eq!(run.status, RunStatus::AwaitingApproval);
        assert!(doc.exists());
        assert_eq!(h.performer.calls().len(), 3);

        let request_id = request_id_for(&run.task_id, 4);
        h.pipeline
            .gateway
            .record_decision(&request_id, ApprovalStatus::Approved, None)
            .unwrap();

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(h.performer.call_count("analyze_request"), 1);
        assert_eq!(h.performer.call_count("transfer_funds"), 1);
        let requested = events(&h.paths)
            .iter()
            .filter(|e| **e == AuditEvent::ApprovalRequested)
            .count();
        assert_eq!(requested, 1);
        assert_eq!(list_documents(&h.paths.plans).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_step_is_quarantined_then_retried_once() {
        let (mut h, clock) = harness();
        let flaky = || ActionOutcome::failed(FailureKind::Transient, "upstream 503");
        h.performer
            .set_outcomes("execute_task", vec![flaky(), flaky(), flaky()]);
        drop_task(&h.paths, "weather.md", WEATHER);

        let first = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.quarantined, 1);
        assert_eq!(h.performer.call_count("execute_task"), 3);
        assert_eq!(count_documents(&h.paths.errors), 1);
        let run = only_run(&h.paths);
        assert_eq!(run.status, RunStatus::Quarantined);
        assert_eq!(run.plan.steps[2].status, StepStatus::Failed);

        // not yet due
        let idle = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(idle.retries_released, 0);

        clock.advance(Duration::from_secs(300));
        let second = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.retries_released, 1);
        assert_eq!(second.completed, 1);
        // completed steps were not run again
        assert_eq!(h.performer.call_count("analyze_request"), 1);
        assert_eq!(h.performer.call_count("execute_task"), 4);
        assert!(h.paths.done.join("weather.md").exists());
        assert_eq!(count_documents(&h.paths.errors), 0);

        let run = only_run(&h.paths);
        assert!(run.retried);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(events(&h.paths).contains(&AuditEvent::RetryReleased));
    }

    #[tokio::test]
    async fn second_failure_after_retry_stays_quarantined() {
        let (mut h, clock) = harness();
        let flaky = || ActionOutcome::failed(FailureKind::Transient, "upstream 503");
        h.performer
            .set_outcomes("execute_task", (0..6).map(|_| flaky()).collect());
        drop_task(&h.paths, "weather.md", WEATHER);

        h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        clock.advance(Duration::from_secs(300));
        let second = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.retries_released, 1);
        assert_eq!(second.quarantined, 1);

        clock.advance(Duration::from_secs(3600));
        let third = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(third.retries_released, 0);

        let records = Quarantine::new(&h.paths.errors, Duration::from_secs(300))
            .list()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|(_, r)| !r.retry_eligible));
    }

    #[tokio::test]
    async fn non_retryable_failure_skips_scheduled_retry() {
        let (mut h, clock) = harness();
        h.performer.set_outcomes(
            "execute_task",
            vec![ActionOutcome::failed(FailureKind::Permission, "403 forbidden")],
        );
        drop_task(&h.paths, "weather.md", WEATHER);

        let first = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.quarantined, 1);
        assert_eq!(h.performer.call_count("execute_task"), 1);

        clock.advance(Duration::from_secs(3600));
        let later = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(later.retries_released, 0);

        let quarantined = AuditTrail::new(&h.paths.audit_log)
            .read_all()
            .unwrap()
            .into_iter()
            .find(|e| e.event == AuditEvent::TaskQuarantined)
            .unwrap();
        assert_eq!(quarantined.details["failure_kind"], "permission");
        assert_eq!(quarantined.details["retry_eligible"], false);
    }

    #[tokio::test]
    async fn iteration_ceiling_quarantines_task() {
        let mut config = GatehouseConfig::default();
        config.pipeline.max_iterations = 2;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch());
        let mut h = harness_with(move |_| clock, config);
        drop_task(&h.paths, "weather.md", WEATHER);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.quarantined, 1);
        assert_eq!(h.performer.calls().len(), 2);

        let run = only_run(&h.paths);
        assert_eq!(run.status, RunStatus::Quarantined);
        assert_eq!(run.plan.steps[2].status, StepStatus::Pending);
        let quarantined = AuditTrail::new(&h.paths.audit_log)
            .read_all()
            .unwrap()
            .into_iter()
            .find(|e| e.event == AuditEvent::TaskQuarantined)
            .unwrap();
        assert_eq!(quarantined.details["failure_kind"], "iteration_limit");
    }

    #[tokio::test]
    async fn unreadable_document_is_left_in_place() {
        let (mut h, _clock) = harness();
        let missing = h.paths.inbox.join("gone.md");
        let outcome = h
            .pipeline
            .process_task(&missing, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::IngestionFailed);
        assert_eq!(events(&h.paths), vec![AuditEvent::IngestionFailed]);

        // a bad document does not stop the others
        drop_task(&h.paths, "weather.md", WEATHER);
        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_processes_nothing() {
        let (mut h, _clock) = harness();
        drop_task(&h.paths, "weather.md", WEATHER);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = h.pipeline.run_once(&cancel).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert!(h.paths.inbox.join("weather.md").exists());
    }

    #[tokio::test]
    async fn status_report_counts_stages() {
        let (mut h, _clock) = harness();
        drop_task(&h.paths, "weather.md", WEATHER);
        h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        drop_task(&h.paths, "later.md", "Schedule a meeting with the design team");

        let report = status_report(&h.paths).unwrap();
        let count = |name: &str| {
            report
                .stages
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, c)| *c)
                .unwrap()
        };
        assert_eq!(count("Inbox"), 1);
        assert_eq!(count("Done"), 1);
        assert_eq!(count("Plans"), 1);
        assert_eq!(report.processed, 1);
        assert!(report.pending_approvals.is_empty());
        assert_eq!(report.lock, LockState::Free);
    }

    #[tokio::test]
    async fn missing_decision_document_at_timeout_requeues_original() {
        let mut h = harness_with(
            |paths| {
                let clock: Arc<dyn Clock> = Arc::new(DiscardingClock {
                    inner: ManualClock::at_epoch(),
                    needs_approval: paths.needs_approval.clone(),
                });
                clock
            },
            GatehouseConfig::default(),
        );
        drop_task(&h.paths, "wire.md", WIRE);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert!(!h.paths.inbox.join("wire.md").exists());

        let inbox = list_documents(&h.paths.inbox).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0], h.paths.inbox.join("timeout_wire.md"));
        let requeued = std::fs::read_to_string(&inbox[0]).unwrap();
        assert!(requeued.contains(WIRE));
        assert_ne!(requeued, WIRE);

        let run = only_run(&h.paths);
        assert_eq!(run.status, RunStatus::TimedOut);
        assert_eq!(run.final_path.as_deref(), Some(inbox[0].display().to_string().as_str()));
        assert_eq!(h.performer.call_count("transfer_funds"), 0);
    }

    #[tokio::test]
    async fn resumed_request_waits_only_for_the_rest_of_its_window() {
        let (mut h, clock) = harness();
        let doc = drop_task(&h.paths, "wire.md", WIRE);
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let outcome = h.pipeline.process_task(&doc, &cancelled).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Deferred);

        clock.advance(Duration::from_secs(3000));
        let resumed_at = clock.now();
        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.timed_out, 1);
        assert_eq!((clock.now() - resumed_at).unsigned_abs(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn run_saved_without_recorded_hash_resumes_instead_of_replanning() {
        let (mut h, clock) = harness();
        let doc = drop_task(&h.paths, "wire.md", WIRE);
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        h.pipeline.process_task(&doc, &cancelled).await.unwrap();

        // crash after the run was saved, before the hash reached disk
        std::fs::remove_file(&h.paths.processed_json).unwrap();
        restart(&mut h, Box::new(RuleClassifier::new().unwrap()), clock);

        let run = only_run(&h.paths);
        h.pipeline
            .gateway
            .record_decision(&request_id_for(&run.task_id, 4), ApprovalStatus::Approved, None)
            .unwrap();
        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);

        assert_eq!(list_documents(&h.paths.plans).unwrap().len(), 1);
        assert_eq!(count_events(&h.paths, AuditEvent::PlanCreated), 1);
        assert_eq!(count_events(&h.paths, AuditEvent::TaskIngested), 1);
        assert_eq!(h.performer.call_count("analyze_request"), 1);
        assert!(IdempotencyTracker::load(&h.paths.processed_json).is_processed(&run.content_hash));
    }

    #[tokio::test]
    async fn step_left_in_progress_is_run_again() {
        let (mut h, _clock) = harness();
        let doc = drop_task(&h.paths, "wire.md", WIRE);
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        h.pipeline.process_task(&doc, &cancelled).await.unwrap();

        // crash while step 3 was executing
        let mut run = only_run(&h.paths);
        run.plan.steps[2].status = StepStatus::InProgress;
        run.progress[2].completed_at = None;
        save_run(&h.paths.runs_dir, &run).unwrap();
        let action = run.plan.steps[2].action.clone();
        assert_eq!(h.performer.call_count(&action), 1);

        h.pipeline
            .gateway
            .record_decision(&request_id_for(&run.task_id, 4), ApprovalStatus::Approved, None)
            .unwrap();
        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(h.performer.call_count(&action), 2);
        assert_eq!(h.performer.call_count("analyze_request"), 1);

        let run = only_run(&h.paths);
        assert!(run.plan.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn classifier_error_falls_back_to_general_low() {
        let (mut h, clock) = harness();
        restart(&mut h, Box::new(FailingClassifier), clock);
        drop_task(&h.paths, "wire.md", WIRE);

        let summary = h.pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(summary.completed, 1);

        let run = only_run(&h.paths);
        assert_eq!(run.classification.task_type, TaskType::General);
        assert_eq!(run.classification.risk_level, RiskLevel::Low);
        assert_eq!(run.plan.steps.len(), 5);
        assert!(run.plan.steps.iter().all(|s| !s.risky));
        assert_eq!(h.performer.call_count("transfer_funds"), 0);
        assert!(h.paths.done.join("wire.md").exists());
        assert_eq!(count_events(&h.paths, AuditEvent::ApprovalRequested), 0);
    }
}
