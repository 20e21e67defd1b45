//! Role backend abstraction.
//!
//! The [`RoleBackend`] trait decouples the turn controller from the actual
//! text-generation service (by default the `copilot` CLI). Tests use scripted
//! backends that return predetermined outputs without spawning processes.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::types::Role;
use crate::io::cancel::CancelFlag;
use crate::io::config::BackendConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one role invocation.
#[derive(Debug, Clone)]
pub struct RoleRequest {
    pub role: Role,
    pub model: String,
    /// Rendered instructions plus input data.
    pub payload: String,
    /// Working directory for the backend process.
    pub workdir: PathBuf,
    pub timeout: Duration,
}

/// Abstraction over text-generation backends.
pub trait RoleBackend {
    /// Return the raw output text for `request`. Timeouts and transport
    /// failures are errors; an empty answer is not.
    fn invoke(&self, request: &RoleRequest) -> Result<String>;

    /// Whether the backend expands `[[dialectic-ref:...]]` cache tokens.
    fn resolves_references(&self) -> bool {
        false
    }
}

/// Credentials exported to the backend process.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(..)")
    }
}

/// Resolve a GitHub token from `GITHUB_TOKEN`, `GH_TOKEN` or `gh auth token`.
#[instrument(skip_all)]
pub fn resolve_credentials() -> Result<Credentials> {
    for var in ["GITHUB_TOKEN", "GH_TOKEN"] {
        if let Ok(token) = env::var(var)
            && !token.trim().is_empty()
        {
            debug!(source = var, "using token from environment");
            return Ok(Credentials {
                token: token.trim().to_string(),
            });
        }
    }
    let mut cmd = Command::new("gh");
    cmd.args(["auth", "token"]);
    let output = run_command_with_timeout(cmd, None, Duration::from_secs(30), 64 * 1024, None)
        .context("no GITHUB_TOKEN set and `gh auth token` could not be run; log in with `gh auth login`")?;
    let token = output.stdout_lossy().trim().to_string();
    if !output.success() || token.is_empty() {
        bail!("no GITHUB_TOKEN set and `gh auth token` returned nothing; log in with `gh auth login`");
    }
    debug!(source = "gh", "using token from gh auth");
    Ok(Credentials { token })
}

/// Backend that spawns a configurable CLI per invocation.
///
/// The payload is written to a temporary file (substituted for `{prompt_file}`)
/// and also piped on stdin. Stdout is the role output.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    command: Vec<String>,
    output_limit_bytes: usize,
    resolves_references: bool,
    credentials: Option<Credentials>,
    cancel: CancelFlag,
}

impl CommandBackend {
    pub fn new(cfg: &BackendConfig, credentials: Option<Credentials>, cancel: CancelFlag) -> Self {
        Self {
            command: cfg.command.clone(),
            output_limit_bytes: cfg.output_limit_bytes,
            resolves_references: cfg.resolves_references,
            credentials,
            cancel,
        }
    }

    fn argv(&self, model: &str, prompt_file: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{model}", model)
                    .replace("{prompt_file}", prompt_file)
            })
            .collect()
    }
}

impl RoleBackend for CommandBackend {
    #[instrument(skip_all, fields(role = %request.role, model = %request.model, payload_bytes = request.payload.len()))]
    fn invoke(&self, request: &RoleRequest) -> Result<String> {
        let prompt_file = tempfile::Builder::new()
            .prefix("dialectic_")
            .suffix(".md")
            .tempfile()
            .context("create prompt file")?;
        std::fs::write(prompt_file.path(), &request.payload)
            .with_context(|| format!("write prompt file {}", prompt_file.path().display()))?;

        let argv = self.argv(&request.model, &prompt_file.path().to_string_lossy());
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("backend command is empty"))?;
        info!(program = %program, "invoking backend");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        if let Some(credentials) = &self.credentials {
            cmd.env("GITHUB_TOKEN", &credentials.token)
                .env("GH_TOKEN", &credentials.token);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.payload.as_bytes()),
            request.timeout,
            self.output_limit_bytes,
            Some(&self.cancel),
        )
        .with_context(|| format!("run backend {program}"))?;

        if output.cancelled {
            bail!("{} invocation interrupted", request.role);
        }
        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "backend timed out");
            bail!(
                "{} invocation timed out after {}s",
                request.role,
                request.timeout.as_secs()
            );
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "backend failed");
            return Err(anyhow!(
                "{} invocation failed with status {:?}: {}",
                request.role,
                output.status.code(),
                stderr.trim()
            ));
        }
        debug!(stdout_bytes = output.stdout.len(), "backend completed");
        Ok(output.stdout_lossy())
    }

    fn resolves_references(&self) -> bool {
        self.resolves_references
    }
}
