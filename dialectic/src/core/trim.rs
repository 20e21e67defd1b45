//! Text trimming helpers that never split a UTF-8 character.

/// Longest prefix of `s` that fits in `max_bytes` and ends on a char boundary.
pub fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Keep the first `head` and last `tail` lines, replacing the middle with an
/// omission marker.
pub fn head_tail_lines(text: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= head + tail {
        return text.trim_end().to_string();
    }
    let omitted = lines.len() - head - tail;
    let mut rendered = lines[..head].join("\n");
    if !rendered.is_empty() {
        rendered.push('\n');
    }
    rendered.push_str(&format!("... [{omitted} lines omitted] ..."));
    for line in &lines[lines.len() - tail..] {
        rendered.push('\n');
        rendered.push_str(line);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "aé"; // 'é' is two bytes
        assert_eq!(truncate_to_bytes(s, 2), "a");
        assert_eq!(truncate_to_bytes(s, 3), "aé");
        assert_eq!(truncate_to_bytes(s, 0), "");
    }

    #[test]
    fn head_tail_keeps_both_ends() {
        let text = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let trimmed = head_tail_lines(&text, 2, 3);
        assert_eq!(trimmed, "1\n2\n... [5 lines omitted] ...\n8\n9\n10");
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(head_tail_lines("a\nb\n", 1, 1), "a\nb");
    }

    #[test]
    fn zero_head_keeps_tail_only() {
        assert_eq!(head_tail_lines("a\nb\nc", 0, 1), "... [2 lines omitted] ...\nc");
    }
}
