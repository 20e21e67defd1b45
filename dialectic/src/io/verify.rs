//! Verification runner: build/lint/test checks run against the workspace after
//! each implementation.
//!
//! Checks come from explicit configuration or from auto-detection of the
//! workspace's project files. A check that cannot apply (tool not installed,
//! script or target not declared) is reported as skipped, never failed.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::trim::head_tail_lines;
use crate::core::types::{CheckResult, CheckStatus, VerificationReport};
use crate::io::cancel::CancelFlag;
use crate::io::config::VerificationConfig;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::io::workspace::CommandLimits;

static JUST_CI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^@?ci(\s[^:]*)?:").expect("just recipe regex"));
static MAKE_TEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^test\s*:").expect("make target regex"));

/// A check selected for this workspace, possibly already known to be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCheck {
    pub name: String,
    pub command: String,
    pub skip_reason: Option<String>,
}

impl PlannedCheck {
    fn run(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            skip_reason: None,
        }
    }

    fn skipped(name: &str, command: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            skip_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub workdir: PathBuf,
    pub checks: Vec<PlannedCheck>,
    pub limits: CommandLimits,
    pub stop_on_failure: bool,
}

impl VerificationRequest {
    pub fn from_config(workdir: &Path, cfg: &VerificationConfig) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            checks: plan_checks(workdir, cfg),
            limits: CommandLimits {
                timeout: std::time::Duration::from_secs(cfg.timeout_secs),
                output_limit_bytes: cfg.output_limit_bytes,
                head_lines: cfg.output_head_lines,
                tail_lines: cfg.output_tail_lines,
            },
            stop_on_failure: cfg.stop_on_failure,
        }
    }
}

pub trait Verifier {
    fn run(&self, request: &VerificationRequest) -> Result<VerificationReport>;
}

/// Runs each planned check through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    cancel: CancelFlag,
}

impl CommandVerifier {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }

    fn run_check(&self, check: &PlannedCheck, request: &VerificationRequest) -> CheckResult {
        let started = Instant::now();
        let mut cmd = shell_command(&check.command);
        cmd.current_dir(&request.workdir);
        let limits = request.limits;
        let result = run_command_with_timeout(
            cmd,
            None,
            limits.timeout,
            limits.output_limit_bytes,
            Some(&self.cancel),
        );
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(output) => {
                let status = if output.success() {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                };
                let mut text = head_tail_lines(
                    &output.combined_lossy(),
                    limits.head_lines,
                    limits.tail_lines,
                );
                if output.timed_out {
                    text.push_str(&format!(
                        "\n[timed out after {}s]",
                        limits.timeout.as_secs()
                    ));
                }
                CheckResult {
                    name: check.name.clone(),
                    command: check.command.clone(),
                    status,
                    exit_code: output.status.code(),
                    timed_out: output.timed_out,
                    output: text,
                    skip_reason: None,
                    duration_ms,
                }
            }
            Err(err) => {
                warn!(check = %check.name, err = %format!("{err:#}"), "check could not start");
                CheckResult {
                    name: check.name.clone(),
                    command: check.command.clone(),
                    status: CheckStatus::Failed,
                    exit_code: None,
                    timed_out: false,
                    output: format!("failed to run: {err:#}"),
                    skip_reason: None,
                    duration_ms,
                }
            }
        }
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(checks = request.checks.len()))]
    fn run(&self, request: &VerificationRequest) -> Result<VerificationReport> {
        let mut report = VerificationReport::empty();
        let mut stop_reason: Option<String> = None;

        for check in &request.checks {
            if stop_reason.is_none() && self.cancel.is_cancelled() {
                stop_reason = Some("run interrupted".to_string());
            }
            let skip = stop_reason.clone().or_else(|| check.skip_reason.clone());
            if let Some(reason) = skip {
                debug!(check = %check.name, reason = %reason, "check skipped");
                report.checks.push(CheckResult {
                    name: check.name.clone(),
                    command: check.command.clone(),
                    status: CheckStatus::Skipped,
                    exit_code: None,
                    timed_out: false,
                    output: String::new(),
                    skip_reason: Some(reason),
                    duration_ms: 0,
                });
                continue;
            }

            let result = self.run_check(check, request);
            info!(
                check = %result.name,
                status = ?result.status,
                exit_code = ?result.exit_code,
                duration_ms = result.duration_ms,
                "check finished"
            );
            if result.status == CheckStatus::Failed && request.stop_on_failure {
                stop_reason = Some(format!("stopped after `{}` failed", result.name));
            }
            report.checks.push(result);
        }
        Ok(report)
    }
}

/// Explicit commands when configured, otherwise auto-detected checks.
pub fn plan_checks(root: &Path, cfg: &VerificationConfig) -> Vec<PlannedCheck> {
    if !cfg.commands.is_empty() {
        return cfg
            .commands
            .iter()
            .map(|c| PlannedCheck::run(c, c))
            .collect();
    }
    detect_checks(root)
}

/// Inspect project files in `root` and choose build, lint and test checks.
pub fn detect_checks(root: &Path) -> Vec<PlannedCheck> {
    let mut checks = Vec::new();

    if root.join("Cargo.toml").is_file() {
        checks.extend(cargo_checks());
    }
    if let Some(scripts) = npm_scripts(&root.join("package.json")) {
        checks.extend(npm_checks(&scripts));
    }
    if root.join("pyproject.toml").is_file() || root.join("setup.py").is_file() {
        checks.push(python_check(root));
    }
    if let Some(check) = recipe_check(
        root,
        &["justfile", "Justfile", ".justfile"],
        &JUST_CI_RE,
        "just",
        "just ci",
        "no `ci` recipe in justfile",
    ) {
        checks.push(check);
    }
    if let Some(check) = recipe_check(
        root,
        &["Makefile", "makefile", "GNUmakefile"],
        &MAKE_TEST_RE,
        "make",
        "make test",
        "no `test` target in Makefile",
    ) {
        checks.push(check);
    }

    debug!(count = checks.len(), "detected verification checks");
    checks
}

fn cargo_checks() -> Vec<PlannedCheck> {
    let cargo = program_on_path("cargo");
    let with_tool = |name: &str, command: &str, tool: &str| {
        if cargo && program_on_path(tool) {
            PlannedCheck::run(name, command)
        } else {
            PlannedCheck::skipped(name, command, format!("`{tool}` is not installed"))
        }
    };
    vec![
        with_tool("cargo build", "cargo build", "cargo"),
        with_tool(
            "cargo clippy",
            "cargo clippy --all-targets -- -D warnings",
            "cargo-clippy",
        ),
        with_tool("cargo test", "cargo test", "cargo"),
    ]
}

fn npm_scripts(manifest: &Path) -> Option<Vec<String>> {
    let text = fs::read_to_string(manifest).ok()?;
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            warn!(err = %err, "package.json is not valid JSON");
            return Some(Vec::new());
        }
    };
    Some(
        value
            .get("scripts")
            .and_then(|s| s.as_object())
            .map(|scripts| scripts.keys().cloned().collect())
            .unwrap_or_default(),
    )
}

fn npm_checks(scripts: &[String]) -> Vec<PlannedCheck> {
    let npm = program_on_path("npm");
    ["build", "lint", "test"]
        .into_iter()
        .map(|script| {
            let name = format!("npm {script}");
            let command = format!("npm run {script}");
            if !scripts.iter().any(|s| s == script) {
                PlannedCheck::skipped(&name, &command, format!("no `{script}` script in package.json"))
            } else if !npm {
                PlannedCheck::skipped(&name, &command, "`npm` is not installed")
            } else {
                PlannedCheck::run(&name, &command)
            }
        })
        .collect()
}

fn python_check(root: &Path) -> PlannedCheck {
    let command = "python -m pytest";
    if !root.join("tests").is_dir() && !root.join("test").is_dir() {
        PlannedCheck::skipped("pytest", command, "no tests directory")
    } else if !program_on_path("python") {
        PlannedCheck::skipped("pytest", command, "`python` is not installed")
    } else {
        PlannedCheck::run("pytest", command)
    }
}

fn recipe_check(
    root: &Path,
    names: &[&str],
    pattern: &Regex,
    program: &str,
    command: &str,
    missing: &str,
) -> Option<PlannedCheck> {
    let path = names.iter().map(|n| root.join(n)).find(|p| p.is_file())?;
    let text = fs::read_to_string(&path).unwrap_or_default();
    Some(if !pattern.is_match(&text) {
        PlannedCheck::skipped(command, command, missing)
    } else if !program_on_path(program) {
        PlannedCheck::skipped(command, command, format!("`{program}` is not installed"))
    } else {
        PlannedCheck::run(command, command)
    })
}

/// Whether `program` resolves to a file on `PATH`.
pub fn program_on_path(program: &str) -> bool {
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}
