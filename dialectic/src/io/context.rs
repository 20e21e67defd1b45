//! Context snapshots of the workspace handed to each role.
//!
//! A snapshot is rebuilt from disk every turn and never mutated afterwards.
//! Byte and file-count ceilings are enforced by
//! [`SnapshotBudget`](crate::core::selection::SnapshotBudget).

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::cache::ContextCache;
use crate::core::selection::{
    Admission, Candidate, SkipReason, SnapshotBudget, order_candidates, render_entry,
};
use crate::io::config::{ContextConfig, ContextMode};
use crate::io::git::Git;

/// Bytes scanned for a NUL byte when detecting binary files.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    Full,
    Changed,
}

impl SnapshotMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotMode::Full => "full",
            SnapshotMode::Changed => "changed",
        }
    }
}

/// Pick the snapshot mode for a turn. `auto` sends everything on the first
/// turn and right after a replan, and only changes otherwise.
pub fn resolve_mode(configured: ContextMode, turn: u32, replanned: bool) -> SnapshotMode {
    match configured {
        ContextMode::Full => SnapshotMode::Full,
        ContextMode::Changed => SnapshotMode::Changed,
        ContextMode::Auto if turn <= 1 || replanned => SnapshotMode::Full,
        ContextMode::Auto => SnapshotMode::Changed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludedFile {
    pub path: String,
    /// Size on disk.
    pub size: u64,
    /// Rendered entry bytes counted toward the total.
    pub entry_bytes: usize,
    pub truncated: bool,
    #[serde(skip)]
    body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub mode: SnapshotMode,
    pub files: Vec<IncludedFile>,
    pub skipped: Vec<SkippedFile>,
    pub total_bytes: usize,
    /// Any file was cut or left out for budget reasons.
    pub truncated: bool,
    /// Changed mode was requested but there was no git baseline.
    pub fell_back_to_full: bool,
}

impl ContextSnapshot {
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Render the snapshot, routing every file body through the cache.
    pub fn render(&self, cache: &mut ContextCache) -> String {
        let mut buf = format!(
            "Snapshot mode: {} | files: {} | bytes: {}{}\n",
            self.mode.as_str(),
            self.files.len(),
            self.total_bytes,
            if self.truncated { " | truncated" } else { "" }
        );
        for file in &self.files {
            let body = cache.encode(&file.path, &file.body);
            buf.push_str(&render_entry(&file.path, &body, file.truncated));
        }
        if self.files.is_empty() {
            buf.push_str("\n(no files)\n");
        }
        buf
    }
}

/// Assembles snapshots for one workspace.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    root: PathBuf,
    config: ContextConfig,
    git: Git,
}

impl ContextBuilder {
    pub fn new(root: impl Into<PathBuf>, config: ContextConfig) -> Self {
        let root = root.into();
        Self {
            git: Git::new(root.clone()),
            root,
            config,
        }
    }

    /// Build a snapshot. `recently_changed` are files the Implementer touched in
    /// the previous turn; `priority` are relevance hints placed first.
    #[instrument(skip_all, fields(mode = mode.as_str()))]
    pub fn build(
        &self,
        mode: SnapshotMode,
        recently_changed: &[String],
        priority: &[String],
    ) -> Result<ContextSnapshot> {
        let has_git = self.git.is_repo();
        let (effective, fell_back) = match mode {
            SnapshotMode::Changed if !has_git => {
                debug!("no git baseline, falling back to a full snapshot");
                (SnapshotMode::Full, true)
            }
            other => (other, false),
        };

        let paths: Vec<String> = match effective {
            SnapshotMode::Full => self.eligible_files(has_git)?.into_iter().collect(),
            SnapshotMode::Changed => {
                let mut changed: BTreeSet<String> = self.git.changed_paths()?.into_iter().collect();
                changed.extend(recently_changed.iter().cloned());
                changed
                    .into_iter()
                    .filter(|p| self.is_eligible(p) && self.root.join(p).is_file())
                    .collect()
            }
        };

        let candidates = paths
            .into_iter()
            .filter_map(|path| {
                let size = self.root.join(&path).metadata().ok()?.len();
                Some(Candidate { path, size })
            })
            .collect();
        let ordered = order_candidates(candidates, priority);

        let mut budget = SnapshotBudget::new(self.config.limits());
        let mut files = Vec::new();
        let mut skipped = Vec::new();
        let mut truncated = false;

        for candidate in ordered {
            let body = match self.read_text(&candidate.path) {
                Ok(Some(body)) => body,
                Ok(None) => {
                    skipped.push(SkippedFile {
                        path: candidate.path,
                        reason: SkipReason::Binary,
                    });
                    continue;
                }
                Err(err) => {
                    warn!(path = %candidate.path, err = %format!("{err:#}"), "unreadable file");
                    skipped.push(SkippedFile {
                        path: candidate.path,
                        reason: SkipReason::Unreadable,
                    });
                    continue;
                }
            };
            match budget.admit(&candidate.path, &body) {
                Admission::Included {
                    body_len,
                    entry_bytes,
                    truncated: cut,
                } => {
                    truncated |= cut;
                    let mut body = body;
                    body.truncate(body_len);
                    files.push(IncludedFile {
                        path: candidate.path,
                        size: candidate.size,
                        entry_bytes,
                        truncated: cut,
                        body,
                    });
                }
                Admission::Skipped(reason) => {
                    truncated = true;
                    skipped.push(SkippedFile {
                        path: candidate.path,
                        reason,
                    });
                }
            }
        }

        debug!(
            files = files.len(),
            skipped = skipped.len(),
            total_bytes = budget.used_bytes,
            truncated,
            "snapshot built"
        );
        Ok(ContextSnapshot {
            mode: effective,
            files,
            skipped,
            total_bytes: budget.used_bytes,
            truncated,
            fell_back_to_full: fell_back,
        })
    }

    /// Every snapshot-eligible file in the workspace.
    pub fn known_files(&self) -> Result<BTreeSet<String>> {
        self.eligible_files(self.git.is_repo())
    }

    fn eligible_files(&self, has_git: bool) -> Result<BTreeSet<String>> {
        let all = if has_git {
            self.git.ls_files()?
        } else {
            self.walk()
        };
        Ok(all
            .into_iter()
            .filter(|p| self.is_eligible(p) && self.root.join(p).is_file())
            .collect())
    }

    fn walk(&self) -> Vec<String> {
        let excluded = &self.config.exclude_dirs;
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && excluded
                            .iter()
                            .any(|d| entry.file_name().to_string_lossy() == d.as_str()))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(&self.root).ok()?;
                Some(to_slash(rel))
            })
            .collect()
    }

    fn is_eligible(&self, relative: &str) -> bool {
        let path = Path::new(relative);
        let mut components: Vec<String> = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some(name) = components.pop() else {
            return false;
        };
        if components
            .iter()
            .any(|dir| self.config.exclude_dirs.iter().any(|d| d == dir))
        {
            return false;
        }
        if components.is_empty() && is_run_log_name(&name) {
            return false;
        }
        if self.config.include_names.iter().any(|n| *n == name) {
            return true;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .config
                .include_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// Read a file as text, bounded to slightly more than the per-file ceiling.
    /// `Ok(None)` means the content is binary.
    fn read_text(&self, relative: &str) -> Result<Option<String>> {
        let path = self.root.join(relative);
        let file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        let limit = self.config.max_file_bytes.saturating_add(4) as u64;
        let mut bytes = Vec::new();
        file.take(limit)
            .read_to_end(&mut bytes)
            .with_context(|| format!("read {}", path.display()))?;
        let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
        if sniff.contains(&0) {
            return Ok(None);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                let utf8 = err.utf8_error();
                // A character cut at the read limit is fine; anything else is not text.
                if utf8.error_len().is_none() {
                    let mut bytes = err.into_bytes();
                    bytes.truncate(utf8.valid_up_to());
                    Ok(String::from_utf8(bytes).ok())
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Log files written by previous runs (`dialectic-YYYYMMDD-HHMMSS.json`).
pub fn is_run_log_name(name: &str) -> bool {
    name.starts_with("dialectic-") && name.ends_with(".json")
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
