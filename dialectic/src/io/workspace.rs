//! Workspace mutations requested by the Implementer.
//!
//! Every write goes through [`write_atomic`]. Paths are resolved with
//! [`safe_join`], which refuses absolute paths and anything that would leave
//! the workspace root. A failed mutation never aborts the turn; it is recorded
//! with a diagnostic capture and reported to the Reviewer.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{FileOp, ImplementationDecision};
use crate::core::trim::head_tail_lines;
use crate::core::types::CommandRun;
use crate::io::cancel::CancelFlag;
use crate::io::process::{run_command_with_timeout, shell_command};

/// Write `contents` to `path` via a temporary sibling file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| anyhow!(err.error))
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Resolve a workspace-relative path, refusing escapes and VCS internals.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let trimmed = relative.trim();
    if trimmed.is_empty() {
        bail!("empty path");
    }
    let candidate = Path::new(trimmed);
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                if part == ".git" {
                    bail!("refusing to touch .git: {trimmed}");
                }
                normalized.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    bail!("path escapes the workspace: {trimmed}");
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("absolute paths are not allowed: {trimmed}");
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        bail!("path resolves to the workspace root: {trimmed}");
    }
    Ok(root.join(normalized))
}

/// Environment facts captured when a write fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDiagnostics {
    pub user: String,
    pub target: String,
    pub parent: String,
    pub parent_exists: bool,
    pub parent_mode: Option<String>,
    /// `ok` or the error from creating a scratch file in the parent.
    pub write_probe: String,
}

impl fmt::Display for WriteDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user={} parent={} parent_exists={} parent_mode={} write_probe={}",
            self.user,
            self.parent,
            self.parent_exists,
            self.parent_mode.as_deref().unwrap_or("?"),
            self.write_probe
        )
    }
}

pub fn diagnose_write(target: &Path) -> WriteDiagnostics {
    let parent = target.parent().unwrap_or(Path::new("."));
    let parent_exists = parent.is_dir();
    let parent_mode = fs::metadata(parent).ok().map(|meta| permissions_label(&meta));
    let write_probe = if parent_exists {
        match tempfile::NamedTempFile::new_in(parent) {
            Ok(_) => "ok".to_string(),
            Err(err) => err.to_string(),
        }
    } else {
        "parent directory missing".to_string()
    };
    WriteDiagnostics {
        user: std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string()),
        target: target.display().to_string(),
        parent: parent.display().to_string(),
        parent_exists,
        parent_mode,
        write_probe,
    }
}

#[cfg(unix)]
fn permissions_label(meta: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions_label(meta: &fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "readonly".to_string()
    } else {
        "writable".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationFailure {
    /// File path or file-op description.
    pub target: String,
    pub error: String,
    pub diagnostics: Option<WriteDiagnostics>,
}

/// Outcome of applying one implementation decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    /// Workspace-relative paths that were written or touched.
    pub changed: Vec<String>,
    pub failures: Vec<MutationFailure>,
}

impl MutationReport {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        if self.changed.is_empty() {
            buf.push_str("Files changed: none\n");
        } else {
            buf.push_str("Files changed:\n");
            for path in &self.changed {
                buf.push_str(&format!("- {path}\n"));
            }
        }
        if !self.failures.is_empty() {
            buf.push_str("\nFailed mutations:\n");
            for failure in &self.failures {
                buf.push_str(&format!("- {}: {}\n", failure.target, failure.error));
                if let Some(diag) = &failure.diagnostics {
                    buf.push_str(&format!("  {diag}\n"));
                }
            }
        }
        buf.trim_end().to_string()
    }
}

/// The directory the loop is converging.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply file writes, then file operations, in order.
    #[instrument(skip_all, fields(files = decision.files.len(), ops = decision.file_ops.len()))]
    pub fn apply(&self, decision: &ImplementationDecision) -> MutationReport {
        let mut report = MutationReport::default();

        for (path, contents) in &decision.files {
            match self.write_file(path, contents) {
                Ok(()) => report.changed.push(path.clone()),
                Err((err, diagnostics)) => {
                    warn!(path = %path, err = %format!("{err:#}"), "file write failed");
                    report.failures.push(MutationFailure {
                        target: path.clone(),
                        error: format!("{err:#}"),
                        diagnostics,
                    });
                }
            }
        }

        for op in &decision.file_ops {
            match self.apply_op(op) {
                Ok(touched) => report.changed.extend(touched),
                Err(err) => {
                    warn!(op = %op.describe(), err = %format!("{err:#}"), "file op failed");
                    let diagnostics = safe_join(&self.root, op.target())
                        .ok()
                        .map(|target| diagnose_write(&target));
                    report.failures.push(MutationFailure {
                        target: op.describe(),
                        error: format!("{err:#}"),
                        diagnostics,
                    });
                }
            }
        }

        report.changed.sort();
        report.changed.dedup();
        info!(
            changed = report.changed.len(),
            failed = report.failures.len(),
            "applied implementation"
        );
        report
    }

    fn write_file(
        &self,
        relative: &str,
        contents: &str,
    ) -> std::result::Result<(), (anyhow::Error, Option<WriteDiagnostics>)> {
        let target = safe_join(&self.root, relative).map_err(|err| (err, None))?;
        write_atomic(&target, contents.as_bytes()).map_err(|err| {
            let diagnostics = diagnose_write(&target);
            (err, Some(diagnostics))
        })
    }

    fn apply_op(&self, op: &FileOp) -> Result<Vec<String>> {
        match op {
            FileOp::Move { from, to } => {
                let src = safe_join(&self.root, from)?;
                let dst = safe_join(&self.root, to)?;
                if !src.exists() {
                    bail!("source does not exist: {from}");
                }
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create directory {}", parent.display()))?;
                }
                fs::rename(&src, &dst).with_context(|| format!("move {from} -> {to}"))?;
                Ok(vec![from.clone(), to.clone()])
            }
            FileOp::Delete { path } => {
                let target = safe_join(&self.root, path)?;
                if target.is_dir() {
                    fs::remove_dir_all(&target).with_context(|| format!("delete {path}"))?;
                } else if target.exists() {
                    fs::remove_file(&target).with_context(|| format!("delete {path}"))?;
                } else {
                    debug!(path = %path, "delete target already absent");
                    return Ok(Vec::new());
                }
                Ok(vec![path.clone()])
            }
            FileOp::Mkdir { path } => {
                let target = safe_join(&self.root, path)?;
                fs::create_dir_all(&target).with_context(|| format!("mkdir {path}"))?;
                Ok(vec![path.clone()])
            }
        }
    }

    /// Run Implementer-requested shell commands sequentially. Output is trimmed
    /// to head/tail lines; failures are recorded, not raised.
    #[instrument(skip_all, fields(count = commands.len()))]
    pub fn run_commands(
        &self,
        commands: &[String],
        limits: CommandLimits,
        cancel: &CancelFlag,
    ) -> Vec<CommandRun> {
        let mut runs = Vec::new();
        for command in commands {
            if cancel.is_cancelled() {
                break;
            }
            let mut cmd = shell_command(command);
            cmd.current_dir(&self.root);
            let run = match run_command_with_timeout(
                cmd,
                None,
                limits.timeout,
                limits.output_limit_bytes,
                Some(cancel),
            ) {
                Ok(output) => CommandRun {
                    command: command.clone(),
                    exit_code: output.status.code(),
                    timed_out: output.timed_out,
                    output: head_tail_lines(
                        &output.combined_lossy(),
                        limits.head_lines,
                        limits.tail_lines,
                    ),
                },
                Err(err) => CommandRun {
                    command: command.clone(),
                    exit_code: None,
                    timed_out: false,
                    output: format!("failed to run: {err:#}"),
                },
            };
            debug!(command = %command, exit_code = ?run.exit_code, "implementer command finished");
            runs.push(run);
        }
        runs
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub head_lines: usize,
    pub tail_lines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn decision(files: &[(&str, &str)], ops: Vec<FileOp>) -> ImplementationDecision {
        ImplementationDecision {
            thought_process: String::new(),
            files: files
                .iter()
                .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
                .collect::<BTreeMap<_, _>>(),
            file_ops: ops,
            commands_to_run: Vec::new(),
        }
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let root = Path::new("/ws");
        assert_eq!(
            safe_join(root, "src/./lib.rs").expect("join"),
            PathBuf::from("/ws/src/lib.rs")
        );
        assert_eq!(
            safe_join(root, "a/../b.txt").expect("join"),
            PathBuf::from("/ws/b.txt")
        );
        assert!(safe_join(root, "../outside.txt").is_err());
        assert!(safe_join(root, "a/../../outside.txt").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, ".git/config").is_err());
        assert!(safe_join(root, "  ").is_err());
        assert!(safe_join(root, ".").is_err());
    }

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/file.txt");
        write_atomic(&path, b"one").expect("write");
        write_atomic(&path, b"two").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn apply_writes_files_then_ops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        fs::write(temp.path().join("old.txt"), "legacy").expect("seed");
        fs::write(temp.path().join("gone.txt"), "bye").expect("seed");

        let report = ws.apply(&decision(
            &[("src/main.rs", "fn main() {}\n")],
            vec![
                FileOp::Move {
                    from: "old.txt".to_string(),
                    to: "archive/old.txt".to_string(),
                },
                FileOp::Delete {
                    path: "gone.txt".to_string(),
                },
                FileOp::Mkdir {
                    path: "docs".to_string(),
                },
            ],
        ));

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(
            report.changed,
            vec!["archive/old.txt", "docs", "gone.txt", "old.txt", "src/main.rs"]
        );
        assert!(temp.path().join("archive/old.txt").exists());
        assert!(!temp.path().join("gone.txt").exists());
        assert!(temp.path().join("docs").is_dir());
    }

    #[test]
    fn failed_mutations_are_recorded_not_raised() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let report = ws.apply(&decision(
            &[("../escape.txt", "x"), ("ok.txt", "fine")],
            vec![FileOp::Move {
                from: "missing.txt".to_string(),
                to: "dest.txt".to_string(),
            }],
        ));
        assert_eq!(report.changed, vec!["ok.txt"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].error.contains("escapes"));
        assert!(report.failures[0].diagnostics.is_none());
        let op_diag = report.failures[1]
            .diagnostics
            .as_ref()
            .expect("op diagnostics");
        assert!(op_diag.target.ends_with("dest.txt"));
        assert_eq!(op_diag.write_probe, "ok");
        assert!(report.render().contains("Failed mutations"));
    }

    #[cfg(unix)]
    #[test]
    fn write_failure_carries_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A regular file where a directory is expected makes the write fail.
        fs::write(temp.path().join("blocker"), "file").expect("seed");
        let ws = Workspace::new(temp.path());
        let report = ws.apply(&decision(&[("blocker/child.txt", "x")], Vec::new()));
        assert_eq!(report.failures.len(), 1);
        let diag = report.failures[0]
            .diagnostics
            .as_ref()
            .expect("diagnostics");
        assert!(diag.target.ends_with("blocker/child.txt"));
        assert!(!diag.parent_exists);
        assert_eq!(diag.write_probe, "parent directory missing");
    }

    #[cfg(unix)]
    #[test]
    fn commands_run_in_workspace_with_trimmed_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let runs = ws.run_commands(
            &["touch marker && seq 1 50".to_string(), "exit 4".to_string()],
            CommandLimits {
                timeout: Duration::from_secs(10),
                output_limit_bytes: 10_000,
                head_lines: 2,
                tail_lines: 2,
            },
            &CancelFlag::new(),
        );
        assert_eq!(runs.len(), 2);
        assert!(temp.path().join("marker").exists());
        assert_eq!(runs[0].exit_code, Some(0));
        assert!(runs[0].output.contains("46 lines omitted"));
        assert_eq!(runs[1].exit_code, Some(4));
    }
}
