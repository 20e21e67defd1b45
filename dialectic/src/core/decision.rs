//! Structured decisions extracted from role output.
//!
//! A [`Decision`] is either fully well-formed or an explicit
//! [`Decision::ParseFailed`]; nothing in between is ever handed downstream.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use jsonschema::Validator;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::types::Role;

const IMPLEMENTER_SCHEMA: &str = include_str!("../../schemas/implementer_output.schema.json");
const REVIEWER_SCHEMA: &str = include_str!("../../schemas/reviewer_output.schema.json");

static IMPLEMENTER_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile_schema(IMPLEMENTER_SCHEMA));
static REVIEWER_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(REVIEWER_SCHEMA));

fn compile_schema(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema should be valid json");
    jsonschema::validator_for(&schema).expect("embedded schema should compile")
}

/// Result of parsing one role invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Plan(PlanDecision),
    Implementation(ImplementationDecision),
    Review(ReviewDecision),
    ParseFailed(ParseFailure),
}

impl Decision {
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Decision::ParseFailed(_))
    }
}

/// Planner output: the full specification text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDecision {
    pub specification: String,
}

/// Implementer output: file mutations plus commands to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationDecision {
    #[serde(default)]
    pub thought_process: String,
    /// Workspace-relative path -> full new file contents.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub file_ops: Vec<FileOp>,
    #[serde(default)]
    pub commands_to_run: Vec<String>,
}

impl ImplementationDecision {
    /// Number of requested mutations (writes plus file operations).
    pub fn mutation_count(&self) -> usize {
        self.files.len() + self.file_ops.len()
    }

    pub fn is_zero_edit(&self) -> bool {
        self.mutation_count() == 0
    }
}

/// Filesystem operation requested alongside file writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum FileOp {
    Move { from: String, to: String },
    Delete { path: String },
    Mkdir { path: String },
}

impl FileOp {
    /// Workspace-relative path the operation writes to.
    pub fn target(&self) -> &str {
        match self {
            FileOp::Move { to, .. } => to,
            FileOp::Delete { path } | FileOp::Mkdir { path } => path,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FileOp::Move { from, to } => format!("move:{from}->{to}"),
            FileOp::Delete { path } => format!("delete:{path}"),
            FileOp::Mkdir { path } => format!("mkdir:{path}"),
        }
    }
}

/// Reviewer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Rejected,
    ReplanNeeded,
}

impl ReviewStatus {
    /// Accepts the spellings models actually emit (`APPROVED`, `replan-needed`, `REPLAN`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "approved" | "approve" | "accepted" => Some(ReviewStatus::Approved),
            "rejected" | "reject" | "changes_requested" => Some(ReviewStatus::Rejected),
            "replan_needed" | "replan" | "needs_replan" => Some(ReviewStatus::ReplanNeeded),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ReviewStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ReviewStatus::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown review status '{raw}'")))
    }
}

/// A find/replace edit the Reviewer wants applied to the specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecEdit {
    pub find: String,
    pub replace: String,
}

/// Reviewer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub status: ReviewStatus,
    /// Ordered list of issues that block approval.
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub specification_edits: Vec<SpecEdit>,
}

impl ReviewDecision {
    /// Feedback text for the next Implementer turn, with blocking issues enumerated.
    pub fn render_feedback(&self) -> String {
        let mut buf = self.feedback.trim().to_string();
        if !self.blocking_issues.is_empty() {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str("Blocking issues:\n");
            for (i, issue) in self.blocking_issues.iter().enumerate() {
                buf.push_str(&format!("{}. {}\n", i + 1, issue.trim()));
            }
        }
        buf.trim_end().to_string()
    }
}

/// Diagnostics for output that could not be turned into a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub role: Role,
    pub reason: String,
    /// First characters of the raw text.
    pub preview: String,
    /// Length of the raw text in characters.
    pub length: usize,
    /// Whether any structural delimiter (`{`, `[`, or a code fence) is present at all.
    pub contains_structural_marker: bool,
    pub contains_fence: bool,
    pub appears_truncated: bool,
}

/// Validate `value` against the Implementer schema and deserialize it.
pub(crate) fn decode_implementation(value: Value) -> Result<ImplementationDecision, String> {
    validate(&IMPLEMENTER_VALIDATOR, &value)?;
    serde_json::from_value(value).map_err(|err| format!("implementer output: {err}"))
}

/// Validate `value` against the Reviewer schema and deserialize it.
pub(crate) fn decode_review(value: Value) -> Result<ReviewDecision, String> {
    validate(&REVIEWER_VALIDATOR, &value)?;
    serde_json::from_value(value).map_err(|err| format!("reviewer output: {err}"))
}

fn validate(validator: &Validator, value: &Value) -> Result<(), String> {
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(format!("schema validation failed: {}", messages.join("; ")))
}
