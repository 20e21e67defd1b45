//! Loop configuration stored under `.dialectic/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::health::HealthThresholds;
use crate::core::selection::SnapshotLimits;
use crate::core::types::Role;

pub const CONFIG_DIR: &str = ".dialectic";
pub const CONFIG_FILE: &str = "config.toml";

/// Default config location for a workspace.
pub fn default_config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Loop configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below and CLI
/// flags override whatever the file says.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DialecticConfig {
    /// Implementer/Reviewer turns before the run is declared exhausted.
    pub max_turns: u32,
    /// Replans honoured per run; later replan requests count as rejections.
    pub max_replans: u32,
    pub requirements_path: PathBuf,
    pub specification_path: PathBuf,
    /// Never call the Planner, even when no specification exists.
    pub skip_planning: bool,
    /// Run the Implementer's `commands_to_run` through the shell.
    pub allow_implementer_commands: bool,
    pub implementer_command_timeout_secs: u64,
    /// Directory with `planner.md`, `implementer.md`, `reviewer.md` overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<PathBuf>,
    /// Upper bound on a rendered role payload.
    pub prompt_budget_bytes: usize,

    pub context: ContextConfig,
    pub verification: VerificationConfig,
    pub health: HealthThresholds,
    pub backend: BackendConfig,
    pub models: ModelConfig,
}

impl Default for DialecticConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_replans: 2,
            requirements_path: PathBuf::from("REQUIREMENTS.md"),
            specification_path: PathBuf::from("SPECIFICATION.md"),
            skip_planning: false,
            allow_implementer_commands: true,
            implementer_command_timeout_secs: 5 * 60,
            prompts_dir: None,
            prompt_budget_bytes: 400_000,
            context: ContextConfig::default(),
            verification: VerificationConfig::default(),
            health: HealthThresholds::default(),
            backend: BackendConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Full snapshot on the first turn and after a replan, changed files otherwise.
    Auto,
    Full,
    Changed,
}

impl FromStr for ContextMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ContextMode::Auto),
            "full" => Ok(ContextMode::Full),
            "changed" => Ok(ContextMode::Changed),
            other => Err(anyhow!(
                "unknown context mode '{other}' (expected auto, full or changed)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub mode: ContextMode,
    pub max_total_bytes: usize,
    pub max_file_bytes: usize,
    pub max_files: usize,
    /// Extensions (without dot) eligible for snapshots.
    pub include_extensions: Vec<String>,
    /// Extension-less file names that are still eligible (e.g. `Makefile`).
    pub include_names: Vec<String>,
    /// Directory names skipped at any depth.
    pub exclude_dirs: Vec<String>,
    /// Replace repeated blocks with cache references.
    pub cache: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let exts = [
            "md", "txt", "json", "yaml", "yml", "toml", "ini", "env", "py", "js", "jsx", "ts",
            "tsx", "css", "scss", "sql", "prisma", "rs", "go", "java", "kt", "c", "h", "cpp",
            "hpp", "sh", "html",
        ];
        let names = ["Makefile", "justfile", "Dockerfile"];
        let dirs = [
            ".git",
            ".hg",
            ".svn",
            ".venv",
            "venv",
            "node_modules",
            ".next",
            "dist",
            "build",
            "out",
            "coverage",
            "__pycache__",
            "target",
            CONFIG_DIR,
        ];
        Self {
            mode: ContextMode::Auto,
            max_total_bytes: 200_000,
            max_file_bytes: 30_000,
            max_files: 60,
            include_extensions: exts.iter().map(|s| (*s).to_string()).collect(),
            include_names: names.iter().map(|s| (*s).to_string()).collect(),
            exclude_dirs: dirs.iter().map(|s| (*s).to_string()).collect(),
            cache: false,
        }
    }
}

impl ContextConfig {
    pub fn limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            max_total_bytes: self.max_total_bytes,
            max_file_bytes: self.max_file_bytes,
            max_files: self.max_files,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Skip the Reviewer when verification fails.
    pub fast_fail: bool,
    /// Stop at the first failing check.
    pub stop_on_failure: bool,
    /// Explicit shell commands; auto-detection is used when empty.
    pub commands: Vec<String>,
    pub timeout_secs: u64,
    pub output_head_lines: usize,
    pub output_tail_lines: usize,
    pub output_limit_bytes: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_fail: true,
            stop_on_failure: false,
            commands: Vec::new(),
            timeout_secs: 10 * 60,
            output_head_lines: 40,
            output_tail_lines: 80,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Argv template. `{model}` and `{prompt_file}` are substituted; the payload
    /// is also piped on stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// The backend expands `[[dialectic-ref:...]]` tokens itself.
    pub resolves_references: bool,
    /// Resolve a GitHub token before the first turn and export it to the child.
    pub require_credentials: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: [
                "copilot",
                "--model",
                "{model}",
                "--allow-all-paths",
                "--silent",
                "-p",
                "Read the file '{prompt_file}'. It contains your instructions and input data. \
                 Follow the instructions in that file exactly. Output only your final answer.",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            timeout_secs: 15 * 60,
            output_limit_bytes: 2_000_000,
            resolves_references: false,
            require_credentials: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub planner: String,
    pub implementer: String,
    pub reviewer: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            planner: "claude-sonnet-4.5".to_string(),
            implementer: "gemini-3-pro-preview".to_string(),
            reviewer: "claude-sonnet-4.5".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Planner => &self.planner,
            Role::Implementer => &self.implementer,
            Role::Reviewer => &self.reviewer,
        }
    }
}

impl DialecticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.implementer_command_timeout_secs == 0 {
            return Err(anyhow!("implementer_command_timeout_secs must be > 0"));
        }
        let ctx = &self.context;
        if ctx.max_total_bytes == 0 || ctx.max_file_bytes == 0 || ctx.max_files == 0 {
            return Err(anyhow!(
                "context.max_total_bytes, context.max_file_bytes and context.max_files must be > 0"
            ));
        }
        if ctx.max_file_bytes > ctx.max_total_bytes {
            return Err(anyhow!(
                "context.max_file_bytes ({}) must not exceed context.max_total_bytes ({})",
                ctx.max_file_bytes,
                ctx.max_total_bytes
            ));
        }
        let verify = &self.verification;
        if verify.timeout_secs == 0 {
            return Err(anyhow!("verification.timeout_secs must be > 0"));
        }
        if verify.output_limit_bytes == 0 {
            return Err(anyhow!("verification.output_limit_bytes must be > 0"));
        }
        if verify.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(anyhow!("verification.commands must not contain empty entries"));
        }
        let backend = &self.backend;
        if backend.command.is_empty() || backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        for role in [Role::Planner, Role::Implementer, Role::Reviewer] {
            if self.models.for_role(role).trim().is_empty() {
                return Err(anyhow!("models.{role} must not be empty"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DialecticConfig::default()`.
pub fn load_config(path: &Path) -> Result<DialecticConfig> {
    if !path.exists() {
        let cfg = DialecticConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DialecticConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DialecticConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::workspace::write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, DialecticConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = default_config_path(temp.path());
        let mut cfg = DialecticConfig::default();
        cfg.max_turns = 4;
        cfg.context.mode = ContextMode::Changed;
        cfg.health.zero_edit_streak = 5;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_turns = 3\n[verification]\nfast_fail = false\n[health]\nrejection_streak = 4\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_turns, 3);
        assert!(!cfg.verification.fast_fail);
        assert_eq!(cfg.verification.timeout_secs, 600);
        assert_eq!(cfg.health.rejection_streak, 4);
        assert_eq!(cfg.health.zero_edit_streak, 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[context]\nmax_file_bytes = 10\nmax_total_bytes = 5\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_file_bytes"));
    }

    #[test]
    fn context_mode_parses_case_insensitively() {
        assert_eq!("FULL".parse::<ContextMode>().expect("mode"), ContextMode::Full);
        assert!("partial".parse::<ContextMode>().is_err());
    }
}
