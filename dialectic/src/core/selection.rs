//! Snapshot budgeting: ordering candidate files and admitting them under the
//! byte and file-count ceilings.
//!
//! Every admitted file is rendered as
//!
//! ```text
//!
//! --- path ---
//! <body>
//! [TRUNCATED]
//! ```
//!
//! (the marker line only when the body was cut). Header and marker bytes count
//! toward `max_total_bytes`; `max_file_bytes` bounds the body alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::trim::truncate_to_bytes;

pub const TRUNCATION_MARKER: &str = "[TRUNCATED]";

/// Partial bodies smaller than this are not worth including.
const MIN_PARTIAL_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLimits {
    pub max_total_bytes: usize,
    pub max_file_bytes: usize,
    pub max_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    pub size: u64,
}

/// Hinted files first (in hint order), then ascending size, then path.
pub fn order_candidates(mut candidates: Vec<Candidate>, priority: &[String]) -> Vec<Candidate> {
    let rank: HashMap<&str, usize> = priority
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i))
        .collect();
    candidates.sort_by(|a, b| {
        let ra = rank.get(a.path.as_str()).copied().unwrap_or(usize::MAX);
        let rb = rank.get(b.path.as_str()).copied().unwrap_or(usize::MAX);
        ra.cmp(&rb)
            .then(a.size.cmp(&b.size))
            .then_with(|| a.path.cmp(&b.path))
    });
    candidates
}

pub fn render_entry(path: &str, body: &str, truncated: bool) -> String {
    let mut entry = format!("\n--- {path} ---\n{body}\n");
    if truncated {
        entry.push_str(TRUNCATION_MARKER);
        entry.push('\n');
    }
    entry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    FileLimit,
    TotalBudget,
    Binary,
    Unreadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The first `body_len` bytes of the body fit (always a char boundary).
    Included {
        body_len: usize,
        entry_bytes: usize,
        truncated: bool,
    },
    Skipped(SkipReason),
}

/// Running totals for one snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotBudget {
    limits: SnapshotLimits,
    pub used_bytes: usize,
    pub files: usize,
}

impl SnapshotBudget {
    pub fn new(limits: SnapshotLimits) -> Self {
        Self {
            limits,
            used_bytes: 0,
            files: 0,
        }
    }

    pub fn admit(&mut self, path: &str, body: &str) -> Admission {
        if self.files >= self.limits.max_files {
            return Admission::Skipped(SkipReason::FileLimit);
        }
        let capped = truncate_to_bytes(body, self.limits.max_file_bytes);
        let mut body_len = capped.len();
        let mut truncated = body_len < body.len();
        let mut entry_bytes = render_entry(path, capped, truncated).len();

        let available = self.limits.max_total_bytes.saturating_sub(self.used_bytes);
        if entry_bytes > available {
            let overhead = render_entry(path, "", true).len();
            if available < overhead + MIN_PARTIAL_BYTES {
                return Admission::Skipped(SkipReason::TotalBudget);
            }
            body_len = truncate_to_bytes(capped, available - overhead).len();
            truncated = true;
            entry_bytes = overhead + body_len;
        }

        self.used_bytes += entry_bytes;
        self.files += 1;
        Admission::Included {
            body_len,
            entry_bytes,
            truncated,
        }
    }
}
