use serde::{Deserialize, Serialize};
use std::fmt;

// ── Task classification ──

/// Kind of work a task document asks for.
///
/// Declaration order is the classifier's tie-break priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Financial,
    Destructive,
    SocialMedia,
    Email,
    Scheduling,
    DocumentReview,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Financial => "financial",
            TaskType::Destructive => "destructive",
            TaskType::SocialMedia => "social-media",
            TaskType::Email => "email",
            TaskType::Scheduling => "scheduling",
            TaskType::DocumentReview => "document-review",
            TaskType::General => "general",
        }
    }

    /// Risk tier before urgency escalation.
    pub fn baseline_risk(&self) -> RiskLevel {
        match self {
            TaskType::Financial | TaskType::Destructive => RiskLevel::High,
            TaskType::SocialMedia | TaskType::Email => RiskLevel::Medium,
            TaskType::Scheduling | TaskType::DocumentReview | TaskType::General => RiskLevel::Low,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// One tier up, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values pulled out of the task text and forwarded to performers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.amounts.is_empty() && self.dates.is_empty()
    }
}

/// Output of a [`crate::Classifier`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub task_type: TaskType,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub urgent: bool,
    /// Rule terms that fired, in text order. Informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Entities::is_empty")]
    pub entities: Entities,
}

impl Classification {
    /// Used when a classifier fails: never block the pipeline on classification.
    pub fn fallback() -> Self {
        Self {
            task_type: TaskType::General,
            risk_level: RiskLevel::Low,
            keywords: Vec::new(),
            summary: String::new(),
            urgent: false,
            matched_terms: Vec::new(),
            entities: Entities::default(),
        }
    }
}

// ── Plans ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One entry in a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// 1-based position within the plan.
    pub index: usize,
    pub description: String,
    /// Action type handed to the performer.
    pub action: String,
    /// External and irreversible: requires a human decision first.
    pub risky: bool,
    pub status: StepStatus,
}

/// Ordered steps for exactly one task. Rebuilt, never edited, on reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub task_type: TaskType,
    pub risk_level: RiskLevel,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn risky_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.risky)
    }

    pub fn requires_approval(&self) -> bool {
        self.steps.iter().any(|s| s.risky)
    }
}
