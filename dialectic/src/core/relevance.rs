//! File-relevance hints. Annotators are opaque: they only name workspace files
//! that should appear first in the next context snapshot.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{CheckStatus, VerificationReport};

static PATH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s(\[`'])((?:\./)?[A-Za-z0-9_\-./]+\.[A-Za-z0-9]+):\d+")
        .expect("path regex")
});

pub trait RelevanceAnnotator {
    fn name(&self) -> &'static str;

    /// Workspace-relative paths worth prioritising, most relevant first.
    /// Only paths contained in `known` may be returned.
    fn annotate(&self, report: &VerificationReport, known: &BTreeSet<String>) -> Vec<String>;
}

/// Picks `path:line` references out of failing check output.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputPathAnnotator;

impl RelevanceAnnotator for OutputPathAnnotator {
    fn name(&self) -> &'static str {
        "output-paths"
    }

    fn annotate(&self, report: &VerificationReport, known: &BTreeSet<String>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for check in report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
        {
            for caps in PATH_LINE.captures_iter(&check.output) {
                let raw = caps[1].trim_start_matches("./");
                if known.contains(raw) && seen.insert(raw.to_string()) {
                    out.push(raw.to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckResult;

    fn failed(output: &str) -> CheckResult {
        CheckResult {
            name: "test".to_string(),
            command: "cargo test".to_string(),
            status: CheckStatus::Failed,
            exit_code: Some(1),
            timed_out: false,
            output: output.to_string(),
            skip_reason: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn extracts_known_paths_in_order() {
        let report = VerificationReport {
            checks: vec![failed(
                "error[E0308]: mismatched types\n --> src/parser.rs:10:5\n\
                 note: ./src/lib.rs:3 defined here\nsee src/parser.rs:20\n\
                 missing/file.rs:1 not ours",
            )],
        };
        let known: BTreeSet<String> = ["src/lib.rs", "src/parser.rs"]
            .into_iter()
            .map(String::from)
            .collect();
        let hints = OutputPathAnnotator.annotate(&report, &known);
        assert_eq!(hints, vec!["src/parser.rs", "src/lib.rs"]);
    }

    #[test]
    fn passing_checks_are_ignored() {
        let mut check = failed("src/lib.rs:1");
        check.status = CheckStatus::Passed;
        let report = VerificationReport {
            checks: vec![check],
        };
        let known: BTreeSet<String> = std::iter::once("src/lib.rs".to_string()).collect();
        assert!(OutputPathAnnotator.annotate(&report, &known).is_empty());
    }
}
