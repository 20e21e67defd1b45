//! Specification checklist helpers (`- [ ]` / `- [x]` items).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::decision::SpecEdit;

/// Terminal line appended to the specification when the Reviewer approves.
pub const COMPLETION_MARKER: &str = "<!-- dialectic:complete -->";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistProgress {
    pub checked: usize,
    pub total: usize,
}

impl ChecklistProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.checked == self.total
    }
}

impl fmt::Display for ChecklistProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.checked, self.total)
    }
}

pub fn progress(text: &str) -> ChecklistProgress {
    let mut progress = ChecklistProgress::default();
    for line in text.lines() {
        let line = line.trim_start();
        let Some(rest) = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
        else {
            continue;
        };
        if rest.starts_with("[ ]") {
            progress.total += 1;
        } else if rest.starts_with("[x]") || rest.starts_with("[X]") {
            progress.total += 1;
            progress.checked += 1;
        }
    }
    progress
}

pub fn is_marked_complete(text: &str) -> bool {
    text.lines().any(|line| line.trim() == COMPLETION_MARKER)
}

/// Append the completion marker as the final line (idempotent).
pub fn mark_complete(text: &str) -> String {
    if is_marked_complete(text) {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(COMPLETION_MARKER);
    out.push('\n');
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub text: String,
    pub applied: usize,
    /// `find` strings that were not present in the text.
    pub missing: Vec<String>,
}

/// Apply find/replace edits in order; each replaces the first occurrence.
pub fn apply_edits(text: &str, edits: &[SpecEdit]) -> EditOutcome {
    let mut current = text.to_string();
    let mut applied = 0;
    let mut missing = Vec::new();
    for edit in edits {
        if edit.find.is_empty() {
            continue;
        }
        match current.find(&edit.find) {
            Some(at) => {
                current.replace_range(at..at + edit.find.len(), &edit.replace);
                applied += 1;
            }
            None => missing.push(edit.find.clone()),
        }
    }
    EditOutcome {
        text: current,
        applied,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "# Spec\n\n- [x] parse input\n- [ ] write output\n  * [X] nested\n- not a task\n";

    #[test]
    fn counts_checked_and_open_items() {
        let p = progress(SPEC);
        assert_eq!(p, ChecklistProgress { checked: 2, total: 3 });
        assert_eq!(p.to_string(), "2/3");
        assert!(!p.is_complete());
    }

    #[test]
    fn mark_complete_is_idempotent() {
        let once = mark_complete(SPEC);
        assert!(is_marked_complete(&once));
        assert!(once.ends_with(&format!("{COMPLETION_MARKER}\n")));
        assert_eq!(mark_complete(&once), once);
    }

    #[test]
    fn edits_apply_in_order_and_report_misses() {
        let edits = vec![
            SpecEdit {
                find: "- [ ] write output".to_string(),
                replace: "- [x] write output".to_string(),
            },
            SpecEdit {
                find: "does not exist".to_string(),
                replace: "x".to_string(),
            },
        ];
        let outcome = apply_edits(SPEC, &edits);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.missing, vec!["does not exist".to_string()]);
        assert!(progress(&outcome.text).is_complete());
    }
}
