//! Risk classification of free-text task documents.
//!
//! [`Classifier`] is the seam the pipeline depends on; [`RuleClassifier`] is
//! the deterministic keyword-table implementation.

use crate::types::{Classification, Entities, TaskType};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;

/// Derives task type and risk tier from document text.
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Classification>;
}

/// Keyword table, highest priority first. First matching rule wins.
const RULES: &[(TaskType, &str)] = &[
    (
        TaskType::Financial,
        r"\b(?:payments?|pay|invoices?|transfers?|transferred|wire|money|refunds?|remit)\b|\$\s?\d",
    ),
    (
        TaskType::Destructive,
        r"\b(?:delete|deletes|deleting|destroy|remove|erase|wipe|purge)\b",
    ),
    (
        TaskType::SocialMedia,
        r"\b(?:linkedin|twitter|facebook|instagram|social|publish|post|tweet)\b",
    ),
    (
        TaskType::Email,
        r"\b(?:e-?mails?|recipients?|subject|reply|inbox)\b",
    ),
    (
        TaskType::Scheduling,
        r"\b(?:meeting|schedule|calendar|attend|appointment)\b",
    ),
    (
        TaskType::DocumentReview,
        r"\b(?:report|analysis|document|review|summarize)\b",
    ),
];

const URGENCY: &str = r"\b(?:urgent|urgently|asap|immediately|emergency)\b";

const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "are", "was", "were", "been", "being", "have", "has",
    "had", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "this", "that", "these", "those", "they", "what", "which", "who", "whom",
    "whose", "where", "when", "why", "how", "all", "each", "every", "both", "few", "more",
    "most", "other", "some", "such", "nor", "not", "only", "own", "same", "than", "too",
    "very", "just", "also", "now", "here", "there", "then", "once", "from", "into", "about",
    "please", "your", "their", "them", "you",
];

const SUMMARY_MAX_CHARS: usize = 200;
const MAX_KEYWORDS: usize = 5;

struct Rule {
    task_type: TaskType,
    pattern: Regex,
}

/// Deterministic, case-insensitive rule-table classifier. Pure function of text.
pub struct RuleClassifier {
    rules: Vec<Rule>,
    urgency: Regex,
    word: Regex,
    header: Regex,
    email: Regex,
    amount: Regex,
    date: Regex,
}

impl RuleClassifier {
    pub fn new() -> Result<Self> {
        let rules = RULES
            .iter()
            .map(|(task_type, pattern)| {
                Ok(Rule {
                    task_type: *task_type,
                    pattern: Regex::new(&format!("(?i){pattern}"))
                        .with_context(|| format!("compiling {task_type} rule"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            urgency: Regex::new(&format!("(?i){URGENCY}"))?,
            word: Regex::new(r"[A-Za-z0-9']+")?,
            header: Regex::new(r"^#+\s*")?,
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?,
            amount: Regex::new(r"\$\s?\d[\d,]*(?:\.\d{2})?")?,
            date: Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b|\b\d{4}-\d{2}-\d{2}\b")?,
        })
    }

    fn task_type(&self, text: &str) -> TaskType {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(text))
            .map(|r| r.task_type)
            .unwrap_or(TaskType::General)
    }

    fn matched_terms(&self, text: &str) -> Vec<String> {
        let mut hits: Vec<(usize, String)> = self
            .rules
            .iter()
            .map(|r| &r.pattern)
            .chain(std::iter::once(&self.urgency))
            .flat_map(|re| re.find_iter(text))
            .map(|m| (m.start(), m.as_str().to_lowercase()))
            .collect();
        hits.sort_by_key(|(pos, _)| *pos);
        let mut out: Vec<String> = Vec::new();
        for (_, term) in hits {
            if !out.contains(&term) {
                out.push(term);
            }
        }
        out
    }

    /// Most frequent content words; ties keep first-seen order.
    fn keywords(&self, text: &str) -> Vec<String> {
        let mut freq: HashMap<String, (usize, usize)> = HashMap::new();
        for (pos, m) in self.word.find_iter(text).enumerate() {
            let w = m.as_str().to_lowercase();
            if w.chars().count() <= 3 || STOP_WORDS.contains(&w.as_str()) {
                continue;
            }
            freq.entry(w).or_insert((0, pos)).0 += 1;
        }
        let mut ranked: Vec<(String, usize, usize)> =
            freq.into_iter().map(|(w, (n, first))| (w, n, first)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(w, _, _)| w)
            .collect()
    }

    fn summary(&self, text: &str) -> String {
        let first = text
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or("");
        let first = self.header.replace(first, "");
        if first.chars().count() > SUMMARY_MAX_CHARS {
            let cut: String = first.chars().take(SUMMARY_MAX_CHARS).collect();
            format!("{cut}...")
        } else {
            first.into_owned()
        }
    }

    fn entities(&self, text: &str) -> Entities {
        Entities {
            emails: unique(self.email.find_iter(text).map(|m| m.as_str().to_string())),
            amounts: unique(self.amount.find_iter(text).map(|m| m.as_str().to_string())),
            dates: unique(self.date.find_iter(text).map(|m| m.as_str().to_string())),
        }
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, text: &str) -> Result<Classification> {
        let task_type = self.task_type(text);
        let urgent = self.urgency.is_match(text);
        let mut risk_level = task_type.baseline_risk();
        if urgent {
            risk_level = risk_level.escalate();
        }

        Ok(Classification {
            task_type,
            risk_level,
            keywords: self.keywords(text),
            summary: self.summary(text),
            urgent,
            matched_terms: self.matched_terms(text),
            entities: self.entities(text),
        })
    }
}

fn unique(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
