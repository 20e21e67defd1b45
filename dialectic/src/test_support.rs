//! Test-only fakes: a scripted role backend, a scripted verifier and a
//! scratch workspace.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{CheckResult, CheckStatus, Role, VerificationReport};
use crate::io::backend::{RoleBackend, RoleRequest};
use crate::io::cancel::CancelFlag;
use crate::io::config::DialecticConfig;
use crate::io::verify::{VerificationRequest, Verifier};

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Output(String),
    Fail(String),
}

/// Backend that replays answers in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: RefCell<VecDeque<(Role, ScriptedReply)>>,
    requests: RefCell<Vec<RoleRequest>>,
    resolves_references: bool,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<(Role, ScriptedReply)>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn resolving_references(mut self) -> Self {
        self.resolves_references = true;
        self
    }

    /// Trip `flag` once `calls` invocations have been answered.
    pub fn cancel_after(mut self, calls: usize, flag: CancelFlag) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    pub fn requests(&self) -> Vec<RoleRequest> {
        self.requests.borrow().clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.requests.borrow().iter().map(|r| r.role).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl RoleBackend for ScriptedBackend {
    fn invoke(&self, request: &RoleRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let calls = self.requests.borrow().len();
        if let Some((after, flag)) = &self.cancel_after
            && calls >= *after
        {
            flag.cancel();
        }
        let (role, reply) = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left for {}", request.role))?;
        if role != request.role {
            bail!("scripted reply for {role} but {} was invoked", request.role);
        }
        match reply {
            ScriptedReply::Output(text) => Ok(text),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }

    fn resolves_references(&self) -> bool {
        self.resolves_references
    }
}

/// Verifier that replays reports; passes once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    reports: RefCell<VecDeque<VerificationReport>>,
    runs: Cell<usize>,
}

impl ScriptedVerifier {
    pub fn new(reports: Vec<VerificationReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
            runs: Cell::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.get()
    }
}

impl Verifier for ScriptedVerifier {
    fn run(&self, _request: &VerificationRequest) -> Result<VerificationReport> {
        self.runs.set(self.runs.get() + 1);
        Ok(self
            .reports
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| passing_report("cargo test")))
    }
}

pub fn check(command: &str, status: CheckStatus, output: &str) -> CheckResult {
    CheckResult {
        name: command.to_string(),
        command: command.to_string(),
        status,
        exit_code: match status {
            CheckStatus::Passed => Some(0),
            CheckStatus::Failed => Some(1),
            CheckStatus::Skipped => None,
        },
        timed_out: false,
        output: output.to_string(),
        skip_reason: None,
        duration_ms: 1,
    }
}

pub fn passing_report(command: &str) -> VerificationReport {
    VerificationReport {
        checks: vec![check(command, CheckStatus::Passed, "ok")],
    }
}

pub fn failing_report(command: &str, output: &str) -> VerificationReport {
    VerificationReport {
        checks: vec![check(command, CheckStatus::Failed, output)],
    }
}

/// Implementer answer writing `files`, fenced as models usually send it.
pub fn implementer_reply(files: &[(&str, &str)]) -> ScriptedReply {
    let files: serde_json::Map<String, serde_json::Value> = files
        .iter()
        .map(|(path, body)| ((*path).to_string(), serde_json::Value::from(*body)))
        .collect();
    let body = serde_json::json!({
        "thought_process": "scripted",
        "files": files,
        "file_ops": [],
        "commands_to_run": [],
    });
    ScriptedReply::Output(format!("Here is the change.\n```json\n{body:#}\n```\n"))
}

/// Reviewer answer with `status` (`APPROVED`, `REJECTED`, `REPLAN_NEEDED`).
pub fn review_reply(status: &str, blocking_issues: &[&str]) -> ScriptedReply {
    let body = serde_json::json!({
        "status": status,
        "blocking_issues": blocking_issues,
        "feedback": format!("{status} by script"),
        "specification_edits": [],
    });
    ScriptedReply::Output(format!("```json\n{body:#}\n```"))
}

pub fn plan_reply(spec: &str) -> ScriptedReply {
    ScriptedReply::Output(spec.to_string())
}

/// Scratch workspace with a requirements file.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new(requirements: &str) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("REQUIREMENTS.md"), requirements)?;
        Ok(Self { temp })
    }

    pub fn with_spec(self, spec: &str) -> Result<Self> {
        self.write("SPECIFICATION.md", spec)?;
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        Ok(fs::read_to_string(self.root().join(relative))?)
    }

    /// Run logs written to the workspace root.
    pub fn run_logs(&self) -> Result<Vec<PathBuf>> {
        let mut logs = Vec::new();
        for entry in fs::read_dir(self.root())? {
            let path = entry?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if crate::io::context::is_run_log_name(&name) {
                logs.push(path);
            }
        }
        logs.sort();
        Ok(logs)
    }

    /// Defaults suited to scripted runs: no credentials, small snapshots.
    pub fn config(&self) -> DialecticConfig {
        let mut cfg = DialecticConfig {
            max_turns: 3,
            ..DialecticConfig::default()
        };
        cfg.backend.require_credentials = false;
        cfg.context.max_total_bytes = 20_000;
        cfg.context.max_file_bytes = 5_000;
        cfg
    }
}
