//! Dialectical multi-agent loop.
//!
//! Runs a Planner, an Implementer and a Reviewer against a workspace until the
//! Reviewer approves or the turn budget is exhausted. Each run writes a JSON
//! log (`dialectic-YYYYMMDD-HHMMSS.json`) to the workspace root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use dialectic::controller::{RunOutcome, TurnController};
use dialectic::exit_codes;
use dialectic::io::backend::{CommandBackend, resolve_credentials};
use dialectic::io::cancel::{CancelFlag, install_ctrlc_handler};
use dialectic::io::config::{
    ContextMode, DialecticConfig, default_config_path, load_config, write_config,
};
use dialectic::io::run_log::RunLog;
use dialectic::io::verify::CommandVerifier;
use dialectic::logging::{self, Verbosity};

#[derive(Parser)]
#[command(
    name = "dialectic",
    version,
    about = "Planner / Implementer / Reviewer loop over a workspace"
)]
struct Cli {
    /// Only print errors and the final summary.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Print debug diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the loop until approval, exhaustion or interruption.
    Run(RunArgs),
    /// Write the default config to `.dialectic/config.toml`.
    Init {
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the summary of a run log.
    Report {
        /// Path to a `dialectic-*.json` log.
        log: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Config file (default: `<workspace>/.dialectic/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    max_turns: Option<u32>,
    #[arg(long)]
    max_replans: Option<u32>,
    /// Requirements file, relative to the workspace.
    #[arg(long)]
    requirements: Option<PathBuf>,
    /// Specification file, relative to the workspace.
    #[arg(long)]
    spec: Option<PathBuf>,
    /// Never call the Planner.
    #[arg(long)]
    skip_planning: bool,
    /// `auto`, `full` or `changed`.
    #[arg(long)]
    context_mode: Option<ContextMode>,
    #[arg(long)]
    max_context_bytes: Option<usize>,
    #[arg(long)]
    max_file_bytes: Option<usize>,
    #[arg(long)]
    max_files: Option<usize>,
    /// Verification command (repeatable); replaces auto-detection.
    #[arg(long = "verify", value_name = "CMD")]
    verify: Vec<String>,
    /// Disable verification.
    #[arg(long, conflicts_with = "verify")]
    no_verify: bool,
    /// Skip the Reviewer when verification fails.
    #[arg(long, value_name = "BOOL")]
    fast_fail: Option<bool>,
    /// Replace repeated context blocks with cache references.
    #[arg(long)]
    cache: bool,
    #[arg(long)]
    planner_model: Option<String>,
    #[arg(long)]
    implementer_model: Option<String>,
    #[arg(long)]
    reviewer_model: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.quiet, cli.verbose));
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Init { workspace, force } => cmd_init(&workspace, force),
        Command::Report { log } => cmd_report(&log),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let workspace = args
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace {}", args.workspace.display()))?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&workspace));
    let mut cfg = load_config(&config_path)?;
    apply_overrides(&mut cfg, args);
    cfg.validate().context("invalid settings")?;

    let cancel = CancelFlag::new();
    install_ctrlc_handler(&cancel)?;
    let credentials = if cfg.backend.require_credentials {
        Some(resolve_credentials()?)
    } else {
        None
    };
    let backend = CommandBackend::new(&cfg.backend, credentials, cancel.clone());
    let verifier = CommandVerifier::new(cancel.clone());
    let controller = TurnController::new(&workspace, cfg, &backend, &verifier, cancel)?;

    let report = controller.run()?;
    eprintln!("{}", report.summary);
    match &report.log_error {
        None => eprintln!("run log: {}", report.log_path.display()),
        Some(err) => eprintln!("run log not written: {err}"),
    }
    Ok(match report.outcome {
        RunOutcome::Approved | RunOutcome::Exhausted => exit_codes::OK,
        RunOutcome::Interrupted => exit_codes::INTERRUPTED,
        RunOutcome::Failed(message) => {
            eprintln!("{message}");
            exit_codes::INVALID
        }
    })
}

/// CLI flags win over config file values.
fn apply_overrides(cfg: &mut DialecticConfig, args: &RunArgs) {
    if let Some(max_turns) = args.max_turns {
        cfg.max_turns = max_turns;
    }
    if let Some(max_replans) = args.max_replans {
        cfg.max_replans = max_replans;
    }
    if let Some(path) = &args.requirements {
        cfg.requirements_path = path.clone();
    }
    if let Some(path) = &args.spec {
        cfg.specification_path = path.clone();
    }
    if args.skip_planning {
        cfg.skip_planning = true;
    }
    if let Some(mode) = args.context_mode {
        cfg.context.mode = mode;
    }
    if let Some(bytes) = args.max_context_bytes {
        cfg.context.max_total_bytes = bytes;
    }
    if let Some(bytes) = args.max_file_bytes {
        cfg.context.max_file_bytes = bytes;
    }
    if let Some(files) = args.max_files {
        cfg.context.max_files = files;
    }
    if !args.verify.is_empty() {
        cfg.verification.enabled = true;
        cfg.verification.commands = args.verify.clone();
    }
    if args.no_verify {
        cfg.verification.enabled = false;
    }
    if let Some(fast_fail) = args.fast_fail {
        cfg.verification.fast_fail = fast_fail;
    }
    if args.cache {
        cfg.context.cache = true;
    }
    if let Some(model) = &args.planner_model {
        cfg.models.planner = model.clone();
    }
    if let Some(model) = &args.implementer_model {
        cfg.models.implementer = model.clone();
    }
    if let Some(model) = &args.reviewer_model {
        cfg.models.reviewer = model.clone();
    }
}

fn cmd_init(workspace: &Path, force: bool) -> Result<i32> {
    let path = default_config_path(workspace);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &DialecticConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_report(log: &Path) -> Result<i32> {
    let log = RunLog::load(log)?;
    println!("{}", log.render_summary());
    Ok(exit_codes::OK)
}
