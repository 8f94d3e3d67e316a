use crate::types::{Classification, Plan, Step, StepStatus, TaskType};
use std::fmt::Write as _;

/// (description, action type, risky)
type Template = &'static [(&'static str, &'static str, bool)];

const EMAIL: Template = &[
    ("Analyze the request and identify recipients", "analyze_request", false),
    ("Validate recipient addresses and subject", "validate_recipients", false),
    ("Draft the email body", "draft_email", false),
    ("Send the email", "send_email", true),
    ("Log the sent message", "log_activity", false),
];

const SOCIAL_MEDIA: Template = &[
    ("Analyze the request and target platform", "analyze_request", false),
    ("Validate content against posting guidelines", "validate_content", false),
    ("Draft the post", "draft_post", false),
    ("Publish the post", "publish_post", true),
    ("Log the published post", "log_activity", false),
];

const FINANCIAL: Template = &[
    ("Analyze the financial request", "analyze_request", false),
    ("Validate amount and recipient", "validate_payment", false),
    ("Check amount against approval thresholds", "check_threshold", false),
    ("Transfer the funds", "transfer_funds", true),
    ("Log the transaction and file the receipt", "log_activity", false),
];

const DESTRUCTIVE: Template = &[
    ("Analyze what is to be removed", "analyze_request", false),
    ("Back up the affected items", "backup_items", false),
    ("Validate the deletion scope", "validate_scope", false),
    ("Delete the items", "delete_items", true),
    ("Log the deletion", "log_activity", false),
];

const SCHEDULING: Template = &[
    ("Check calendar availability", "check_calendar", false),
    ("Draft the meeting details", "draft_event", false),
    ("Prepare meeting materials", "prepare_materials", false),
    ("Set reminders", "set_reminders", false),
];

const DOCUMENT_REVIEW: Template = &[
    ("Analyze the document", "analyze_request", false),
    ("Review content for issues", "review_document", false),
    ("Summarize findings", "summarize_findings", false),
    ("File the document", "file_document", false),
];

const GENERAL: Template = &[
    ("Analyze the task", "analyze_request", false),
    ("Identify required resources", "identify_resources", false),
    ("Execute the task", "execute_task", false),
    ("Verify the result", "verify_result", false),
    ("Log the activity", "log_activity", false),
];

fn template(task_type: TaskType) -> Template {
    match task_type {
        TaskType::Email => EMAIL,
        TaskType::SocialMedia => SOCIAL_MEDIA,
        TaskType::Financial => FINANCIAL,
        TaskType::Destructive => DESTRUCTIVE,
        TaskType::Scheduling => SCHEDULING,
        TaskType::DocumentReview => DOCUMENT_REVIEW,
        TaskType::General => GENERAL,
    }
}

/// Expand a classification into a fresh plan with every step pending.
pub fn build_plan(classification: &Classification) -> Plan {
    let steps = template(classification.task_type)
        .iter()
        .enumerate()
        .map(|(i, (description, action, risky))| Step {
            index: i + 1,
            description: (*description).to_string(),
            action: (*action).to_string(),
            risky: *risky,
            status: StepStatus::Pending,
        })
        .collect();

    Plan {
        task_type: classification.task_type,
        risk_level: classification.risk_level,
        steps,
    }
}

/// Render the human-readable plan artifact written under `Plans/`.
pub fn render_plan_markdown(
    task_id: &str,
    source: &str,
    generated_at: &str,
    classification: &Classification,
    plan: &Plan,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Plan: {task_id}");
    out.push('\n');
    let _ = writeln!(out, "- **Task type:** {}", plan.task_type);
    let _ = writeln!(out, "- **Risk level:** {}", plan.risk_level);
    let _ = writeln!(out, "- **Generated:** {generated_at}");
    let _ = writeln!(out, "- **Source:** {source}");
    if classification.urgent {
        out.push_str("- **Urgent:** yes\n");
    }
    out.push('\n');

    if !classification.summary.is_empty() {
        out.push_str("## Summary\n\n");
        let _ = writeln!(out, "{}", classification.summary);
        out.push('\n');
    }
    if !classification.keywords.is_empty() {
        let _ = writeln!(out, "**Keywords:** {}", classification.keywords.join(", "));
        out.push('\n');
    }

    out.push_str("## Steps\n\n");
    for step in &plan.steps {
        let mark = if step.status == StepStatus::Completed { "x" } else { " " };
        let gate = if step.risky { " (requires approval)" } else { "" };
        let _ = writeln!(out, "{}. [{mark}] {}{gate}", step.index, step.description);
    }
    out
}
