pub mod approval;
pub mod audit;
pub mod clock;
pub mod dashboard;
pub mod failure;
pub mod pipeline;
pub mod quarantine;
pub mod runner;
pub mod state;
pub mod wait;

pub use approval::{ApprovalGateway, ApprovalStatus};
pub use audit::{AuditEntry, AuditEvent, AuditTrail};
pub use clock::{Clock, ManualClock, SystemClock};
pub use failure::{FailureKind, StepError};
pub use pipeline::{status_report, CycleSummary, Pipeline, StatusReport, TaskOutcome};
pub use runner::{ActionOutcome, ActionPerformer, BackoffPolicy, MockPerformer, RetryingExecutor};
