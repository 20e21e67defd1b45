//! Templated feedback for turns that never reached a real review.

use crate::core::decision::{ParseFailure, ReviewDecision, ReviewStatus};
use crate::core::types::{CheckStatus, Role, VerificationReport};

/// First lines of a failing check carried into a synthetic blocking issue.
const ISSUE_EXCERPT_LINES: usize = 3;

/// Directive prepended to the next input of a role whose output did not parse.
pub fn format_directive(failure: &ParseFailure) -> String {
    let mut buf = format!(
        "FORMAT ERROR: your previous {} response could not be parsed ({}).\n",
        failure.role, failure.reason
    );
    match failure.role {
        Role::Planner => {
            buf.push_str("Respond with the complete specification as Markdown.\n");
        }
        Role::Implementer | Role::Reviewer => {
            buf.push_str(
                "Respond with exactly one ```json fenced block containing a single JSON object \
                 that matches the required schema. Do not add commentary inside the block.\n",
            );
        }
    }
    if failure.appears_truncated {
        buf.push_str(
            "The response appears truncated. Keep it shorter: send fewer files per turn.\n",
        );
    } else if !failure.contains_structural_marker {
        buf.push_str("No JSON object was found at all.\n");
    }
    buf
}

/// Rejection recorded when a role's output could not be parsed.
pub fn parse_failure_rejection(failure: &ParseFailure) -> ReviewDecision {
    ReviewDecision {
        status: ReviewStatus::Rejected,
        blocking_issues: vec![format!(
            "{} output could not be parsed: {}",
            failure.role, failure.reason
        )],
        feedback: format_directive(failure),
        specification_edits: Vec::new(),
    }
}

/// Rejection recorded when the backend call itself failed.
pub fn invocation_failure_rejection(role: Role, error: &str) -> ReviewDecision {
    ReviewDecision {
        status: ReviewStatus::Rejected,
        blocking_issues: vec![format!("{role} invocation failed: {error}")],
        feedback: format!(
            "The previous {role} call failed before producing output ({error}). \
             Continue from the current workspace state."
        ),
        specification_edits: Vec::new(),
    }
}

/// Rejection synthesised from failing checks when the Reviewer is skipped.
pub fn fast_fail_rejection(report: &VerificationReport) -> ReviewDecision {
    let blocking_issues: Vec<String> = report
        .checks
        .iter()
        .filter(|check| check.status == CheckStatus::Failed)
        .map(|check| {
            let status = if check.timed_out {
                "timed out".to_string()
            } else {
                match check.exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "no exit code".to_string(),
                }
            };
            let excerpt: Vec<&str> = check
                .output
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(ISSUE_EXCERPT_LINES)
                .collect();
            if excerpt.is_empty() {
                format!("`{}` failed ({status})", check.command)
            } else {
                format!(
                    "`{}` failed ({status}): {}",
                    check.command,
                    excerpt.join(" | ")
                )
            }
        })
        .collect();
    ReviewDecision {
        status: ReviewStatus::Rejected,
        blocking_issues,
        feedback: format!(
            "Verification failed, so the review was skipped. Fix these checks first:\n\n{}",
            report.render()
        ),
        specification_edits: Vec::new(),
    }
}
