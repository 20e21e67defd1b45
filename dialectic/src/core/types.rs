//! Shared deterministic types for the loop core.
//!
//! These types define stable contracts between core components. They must not
//! depend on external state or I/O so that they serialize identically across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical participant whose output comes from the text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Implementer,
    Reviewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Implementer => "implementer",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a closed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Approved,
    Rejected,
    Replanned,
    ParseFailed,
    VerificationFailed,
}

impl TurnOutcome {
    /// Every non-approved, non-replanned outcome counts as a rejection in the summary.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            TurnOutcome::Rejected | TurnOutcome::ParseFailed | TurnOutcome::VerificationFailed
        )
    }
}

/// One call to the external text-generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInvocation {
    pub role: Role,
    pub model: String,
    pub input_bytes: usize,
    /// Raw output text; empty when the invocation itself failed.
    pub output: String,
    pub input_tokens_est: u64,
    pub output_tokens_est: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RoleInvocation {
    pub fn total_tokens_est(&self) -> u64 {
        self.input_tokens_est + self.output_tokens_est
    }
}

/// A closed turn. Built by the controller and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-indexed turn number.
    pub index: u32,
    /// Role that was active when the turn closed.
    pub role: Role,
    pub outcome: TurnOutcome,
    pub duration_ms: u64,
    pub invocations: Vec<RoleInvocation>,
    /// Workspace-relative paths written or touched by file operations.
    pub files_changed: Vec<String>,
    pub verification: Option<VerificationReport>,
    /// Feedback handed to the next Implementer invocation.
    pub feedback: String,
    pub blocking_issues: Vec<String>,
}

/// Classification of a single verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// The check does not apply to this workspace (tool or script absent) or was not reached.
    Skipped,
}

/// Result of one verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub command: String,
    pub status: CheckStatus,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout/stderr, trimmed to the configured head/tail line counts.
    pub output: String,
    pub skip_reason: Option<String>,
    pub duration_ms: u64,
}

/// All check results for one verification pass, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    /// A report with no checks (verification disabled).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failed(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Failed)
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Human-readable block handed to the Reviewer.
    pub fn render(&self) -> String {
        if self.checks.is_empty() {
            return "No verification checks were run.".to_string();
        }
        let mut buf = String::new();
        for check in &self.checks {
            let status = match check.status {
                CheckStatus::Passed => "PASSED",
                CheckStatus::Failed => "FAILED",
                CheckStatus::Skipped => "SKIPPED",
            };
            buf.push_str(&format!("### {} [{status}]\n", check.name));
            buf.push_str(&format!("command: {}\n", check.command));
            if let Some(code) = check.exit_code {
                buf.push_str(&format!("exit code: {code}\n"));
            }
            if check.timed_out {
                buf.push_str("timed out: true\n");
            }
            if let Some(reason) = &check.skip_reason {
                buf.push_str(&format!("reason: {reason}\n"));
            }
            if !check.output.trim().is_empty() {
                buf.push_str("```\n");
                buf.push_str(check.output.trim_end());
                buf.push_str("\n```\n");
            }
            buf.push('\n');
        }
        buf.trim_end().to_string()
    }
}

/// Result of a shell command requested by the Implementer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
}

impl CommandRun {
    pub fn render(runs: &[CommandRun]) -> String {
        let mut buf = String::new();
        for run in runs {
            buf.push_str(&format!("$ {}\n", run.command));
            match run.exit_code {
                Some(code) => buf.push_str(&format!("exit code: {code}\n")),
                None if run.timed_out => buf.push_str("timed out\n"),
                None => buf.push_str("exit code: unknown\n"),
            }
            buf.push_str(run.output.trim_end());
            buf.push_str("\n\n");
        }
        buf.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            name: name.to_string(),
            command: format!("run {name}"),
            status,
            exit_code: Some(0),
            timed_out: false,
            output: String::new(),
            skip_reason: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn report_fails_only_on_failed_checks() {
        let report = VerificationReport {
            checks: vec![
                check("build", CheckStatus::Passed),
                check("lint", CheckStatus::Skipped),
            ],
        };
        assert!(!report.failed());

        let report = VerificationReport {
            checks: vec![
                check("build", CheckStatus::Passed),
                check("test", CheckStatus::Failed),
            ],
        };
        assert!(report.failed());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn outcome_rejection_classification() {
        assert!(TurnOutcome::Rejected.is_rejection());
        assert!(TurnOutcome::ParseFailed.is_rejection());
        assert!(TurnOutcome::VerificationFailed.is_rejection());
        assert!(!TurnOutcome::Approved.is_rejection());
        assert!(!TurnOutcome::Replanned.is_rejection());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Reviewer).expect("serialize");
        assert_eq!(json, "\"reviewer\"");
    }
}
