//! Response parsing: free-form role output in, [`Decision`] out.
//!
//! Pure and side-effect free. The contract asks each structured role to emit
//! exactly one fenced JSON block; this module tolerates near misses but never
//! returns a partially decoded decision.

use std::ops::Range;

use serde_json::Value;

use crate::core::decision::{Decision, ParseFailure, PlanDecision, decode_implementation, decode_review};
use crate::core::types::Role;

/// Number of characters kept in [`ParseFailure::preview`].
pub const PREVIEW_CHARS: usize = 500;

const FENCE: &str = "```";

/// Parse raw role output into a decision.
pub fn parse_response(role: Role, text: &str) -> Decision {
    match role {
        Role::Planner => parse_plan(text),
        Role::Implementer => parse_structured(role, text, |value| {
            decode_implementation(value).map(Decision::Implementation)
        }),
        Role::Reviewer => {
            parse_structured(role, text, |value| decode_review(value).map(Decision::Review))
        }
    }
}

/// Planner output is Markdown. An outer code fence is removed; empty output fails.
fn parse_plan(text: &str) -> Decision {
    let body = strip_outer_fence(text);
    if body.trim().is_empty() {
        return Decision::ParseFailed(failure(Role::Planner, text, "empty specification"));
    }
    Decision::Plan(PlanDecision {
        specification: format!("{}\n", body.trim()),
    })
}

fn strip_outer_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };
    let Some(newline) = rest.find('\n') else {
        return trimmed;
    };
    let inner = &rest[newline + 1..];
    inner.strip_suffix(FENCE).unwrap_or(inner).trim()
}

fn parse_structured<F>(role: Role, text: &str, decode: F) -> Decision
where
    F: Fn(Value) -> Result<Decision, String>,
{
    if text.trim().is_empty() {
        return Decision::ParseFailed(failure(role, text, "empty output"));
    }

    // Step 1: well-formed fenced blocks.
    let scan = scan_fenced_blocks(text);
    let mut last_error: Option<String> = None;
    for block in &scan.closed {
        match serde_json::from_str::<Value>(block) {
            Ok(value) => match decode(value) {
                Ok(decision) => return decision,
                Err(err) => last_error = Some(err),
            },
            Err(err) => last_error = Some(format!("invalid json in fenced block: {err}")),
        }
    }
    if scan.unterminated {
        return Decision::ParseFailed(failure(role, text, "code fence opened but never closed"));
    }

    // Step 2: one bounded recovery attempt over the outermost object, decoded
    // as-is first and repaired only when that fails.
    let Some(candidate) = outermost_object(text, &scan.foreign) else {
        let reason = last_error.unwrap_or_else(|| "no json object found".to_string());
        return Decision::ParseFailed(failure(role, text, &reason));
    };
    let value = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => value,
        Err(_) => match serde_json::from_str::<Value>(&repair_json(candidate)) {
            Ok(value) => value,
            Err(err) => {
                return Decision::ParseFailed(failure(
                    role,
                    text,
                    &format!("invalid json after recovery: {err}"),
                ));
            }
        },
    };
    match decode(value) {
        Ok(decision) => decision,
        Err(err) => Decision::ParseFailed(failure(role, text, &err)),
    }
}

#[derive(Debug, Default)]
struct FenceScan<'a> {
    /// JSON bodies of fenced blocks with a closing fence, in order.
    closed: Vec<&'a str>,
    /// Byte ranges of fenced blocks that hold something other than JSON.
    foreign: Vec<Range<usize>>,
    /// A JSON fence was opened but its object or fence never closed.
    unterminated: bool,
}

/// Locate fenced blocks that hold a JSON object.
///
/// The object is delimited with a string-aware brace scan, so backticks inside
/// JSON strings (e.g. Markdown file bodies) do not end the block early. Other
/// fenced blocks are skipped whole, closing fence included.
fn scan_fenced_blocks(text: &str) -> FenceScan<'_> {
    let mut scan = FenceScan::default();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(FENCE) {
        let fence_start = cursor + offset;
        let after_fence = fence_start + FENCE.len();
        let line_end = text[after_fence..]
            .find('\n')
            .map(|i| after_fence + i)
            .unwrap_or(text.len());
        let info = text[after_fence..line_end].trim();
        let json_fence = info.is_empty() || info.eq_ignore_ascii_case("json");
        let body_start = text[line_end..]
            .find(|c: char| !c.is_whitespace())
            .map(|i| line_end + i);
        let Some(body_start) = body_start else {
            // Fence at the very end of the text.
            if json_fence && !info.is_empty() {
                scan.unterminated = true;
            }
            break;
        };
        if !json_fence || !text[body_start..].starts_with('{') {
            match text[line_end..].find(FENCE) {
                Some(close) => {
                    let block_end = line_end + close + FENCE.len();
                    scan.foreign.push(fence_start..block_end);
                    cursor = block_end;
                    continue;
                }
                None => {
                    scan.foreign.push(fence_start..text.len());
                    break;
                }
            }
        }
        let Some(object_end) = matching_close(text, body_start) else {
            scan.unterminated = true;
            break;
        };
        let rest = &text[object_end + 1..];
        match rest.find(FENCE) {
            Some(close) => {
                scan.closed.push(&text[body_start..=object_end]);
                cursor = object_end + 1 + close + FENCE.len();
            }
            None => {
                scan.unterminated = true;
                break;
            }
        }
    }
    scan
}

/// First balanced object outside `skip`. Unbalanced braces mean a cut-off
/// object, so nothing is returned rather than a prefix.
fn outermost_object<'a>(text: &'a str, skip: &[Range<usize>]) -> Option<&'a str> {
    let start = text
        .match_indices('{')
        .map(|(i, _)| i)
        .find(|i| !skip.iter().any(|range| range.contains(i)))?;
    let end = matching_close(text, start)?;
    Some(&text[start..=end])
}

/// Index of the bracket closing the one at `open`, tracking strings and escapes.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair the near-miss JSON models commonly emit: curly double quotes used
/// as delimiters, `//` line comments and trailing commas. Contents of strings
/// opened with a plain `"` are left untouched.
fn repair_json(candidate: &str) -> String {
    let chars: Vec<char> = candidate.chars().collect();
    let mut out = String::with_capacity(candidate.len());
    let mut in_string = false;
    let mut curly = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
            } else if c == '\\' {
                escaped = true;
                out.push(c);
            } else if c == '"' || (curly && is_curly_quote(c)) {
                in_string = false;
                out.push('"');
            } else {
                out.push(c);
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                curly = false;
                out.push(c);
            }
            c if is_curly_quote(c) => {
                in_string = true;
                curly = true;
                out.push('"');
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

fn is_curly_quote(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}')
}

fn failure(role: Role, text: &str, reason: &str) -> ParseFailure {
    ParseFailure {
        role,
        reason: reason.to_string(),
        preview: text.chars().take(PREVIEW_CHARS).collect(),
        length: text.chars().count(),
        contains_structural_marker: text.contains('{') || text.contains('[') || text.contains(FENCE),
        contains_fence: text.contains(FENCE),
        appears_truncated: appears_truncated(text),
    }
}

/// Heuristic: output that stops mid-sentence or leaves an object open was likely cut off.
fn appears_truncated(text: &str) -> bool {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    if let Some(start) = trimmed.find('{')
        && matching_close(trimmed, start).is_none()
    {
        return true;
    }
    let last = trimmed.chars().last().unwrap_or('.');
    !matches!(
        last,
        '}' | ']' | '"' | '.' | '!' | '?' | ')' | ';' | ',' | '`' | ':'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::{ReviewStatus, SpecEdit};

    const REVIEW_JSON: &str = r#"{
  "status": "REJECTED",
  "blocking_issues": ["tests missing"],
  "feedback": "Add tests."
}"#;

    fn review(text: &str) -> Decision {
        parse_response(Role::Reviewer, text)
    }

    fn expect_failure(decision: Decision) -> ParseFailure {
        match decision {
            Decision::ParseFailed(failure) => failure,
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[test]
    fn parses_single_fenced_block() {
        let text = format!("```json\n{REVIEW_JSON}\n```");
        match review(&text) {
            Decision::Review(decision) => {
                assert_eq!(decision.status, ReviewStatus::Rejected);
                assert_eq!(decision.blocking_issues, vec!["tests missing".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn surrounding_prose_and_whitespace_do_not_change_result() {
        let bare = review(&format!("```json\n{REVIEW_JSON}\n```"));
        let wrapped = review(&format!(
            "\n\n  Here is my review:\n\n```json\n{REVIEW_JSON}\n```\n\nLet me know if you need more.\n"
        ));
        let unfenced = review(&format!("Sure. {REVIEW_JSON} Thanks!"));
        assert_eq!(bare, wrapped);
        assert_eq!(bare, unfenced);
    }

    #[test]
    fn missing_closing_fence_is_a_failure() {
        let failure = expect_failure(review(&format!("```json\n{REVIEW_JSON}\n")));
        assert!(failure.reason.contains("never closed"));
        assert!(failure.contains_fence);
    }

    #[test]
    fn missing_closing_brace_is_a_failure() {
        let text = "```json\n{\"status\": \"APPROVED\", \"blocking_issues\": [\n```";
        let failure = expect_failure(review(text));
        assert!(failure.contains_structural_marker);
        assert!(failure.appears_truncated);
    }

    #[test]
    fn unfenced_object_missing_closing_brace_is_a_failure() {
        let failure = expect_failure(review("{\"status\": \"APPROVED\", \"feedback\": {\"a\": 1}"));
        assert!(failure.appears_truncated);
    }

    #[test]
    fn plain_prose_reports_no_structural_marker() {
        let failure = expect_failure(review("Looks good to me, ship it."));
        assert!(!failure.contains_structural_marker);
        assert!(!failure.contains_fence);
        assert_eq!(failure.length, "Looks good to me, ship it.".len());
        assert_eq!(failure.preview, "Looks good to me, ship it.");
    }

    #[test]
    fn preview_is_bounded() {
        let text = "x".repeat(PREVIEW_CHARS * 3);
        let failure = expect_failure(review(&text));
        assert_eq!(failure.preview.chars().count(), PREVIEW_CHARS);
        assert_eq!(failure.length, PREVIEW_CHARS * 3);
    }

    #[test]
    fn recovery_repairs_trailing_commas_and_comments() {
        let text = r#"Result:
{
  "status": "approved", // all good
  "blocking_issues": [],
  "feedback": "see https://example.com/docs",
}
trailing commentary"#;
        match review(text) {
            Decision::Review(decision) => {
                assert_eq!(decision.status, ReviewStatus::Approved);
                assert_eq!(decision.feedback, "see https://example.com/docs");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backticks_inside_json_strings_do_not_end_the_block() {
        let text = "```json\n{\"files\": {\"README.md\": \"```bash\\ncargo test\\n```\\n\"}}\n```";
        match parse_response(Role::Implementer, text) {
            Decision::Implementation(decision) => {
                assert_eq!(
                    decision.files.get("README.md").map(String::as_str),
                    Some("```bash\ncargo test\n```\n")
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn first_valid_block_wins_over_invalid_ones() {
        let text = format!(
            "```json\n{{\"status\": 12}}\n```\nSorry, corrected:\n```json\n{REVIEW_JSON}\n```"
        );
        assert!(matches!(review(&text), Decision::Review(_)));
    }

    #[test]
    fn schema_violation_is_a_failure_with_reason() {
        let failure = expect_failure(review("```json\n{\"feedback\": \"no status\"}\n```"));
        assert!(failure.reason.contains("schema validation failed"));
    }

    #[test]
    fn non_json_fences_are_ignored() {
        let text = format!("```rust\nfn main() {{}}\n```\n```json\n{REVIEW_JSON}\n```");
        assert!(matches!(review(&text), Decision::Review(_)));
    }

    #[test]
    fn curly_quotes_inside_valid_strings_survive_recovery() {
        let text = "Here: {\"thought_process\": \"ok\", \"files\": {\"a.md\": \"say \u{201C}hi\u{201D}\"}}";
        match parse_response(Role::Implementer, text) {
            Decision::Implementation(decision) => assert_eq!(
                decision.files.get("a.md").map(String::as_str),
                Some("say \u{201C}hi\u{201D}")
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn curly_quote_delimiters_are_repaired() {
        let text = "{\u{201C}status\u{201D}: \u{201C}APPROVED\u{201D}, \u{201C}feedback\u{201D}: \"it's \u{201C}done\u{201D}\",}";
        match review(text) {
            Decision::Review(decision) => {
                assert_eq!(decision.status, ReviewStatus::Approved);
                assert_eq!(decision.feedback, "it's \u{201C}done\u{201D}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unfenced_object_after_a_code_block_is_recovered() {
        let text = format!("```rust\nfn main() {{}}\n```\n{REVIEW_JSON}");
        match review(&text) {
            Decision::Review(decision) => assert_eq!(decision.status, ReviewStatus::Rejected),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reviewer_spec_edits_are_decoded() {
        let text = r#"```json
{"status": "replan_needed", "feedback": "Scope is wrong",
 "specification_edits": [{"find": "- [ ] a", "replace": "- [x] a"}]}
```"#;
        match review(text) {
            Decision::Review(decision) => {
                assert_eq!(decision.status, ReviewStatus::ReplanNeeded);
                assert_eq!(
                    decision.specification_edits,
                    vec![SpecEdit {
                        find: "- [ ] a".to_string(),
                        replace: "- [x] a".to_string()
                    }]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn planner_output_strips_outer_fence() {
        match parse_response(Role::Planner, "```markdown\n# Spec\n\n- [ ] step\n```") {
            Decision::Plan(plan) => assert_eq!(plan.specification, "# Spec\n\n- [ ] step\n"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn planner_empty_output_fails() {
        let failure = expect_failure(parse_response(Role::Planner, "  \n```\n```"));
        assert_eq!(failure.role, Role::Planner);
    }

    #[test]
    fn empty_output_fails_without_markers() {
        let failure = expect_failure(parse_response(Role::Implementer, ""));
        assert!(!failure.contains_structural_marker);
        assert!(!failure.appears_truncated);
    }
}
