//! Token cost heuristic shared by the log and the summary.

/// Rough token estimate: one token per four characters, never zero.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    (chars / 4).max(1)
}
