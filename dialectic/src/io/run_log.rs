//! Run log: the ordered event record of one run, its derived summary and the
//! health alerts raised along the way.
//!
//! The log is written exactly once per run, atomically, to
//! `<workspace>/dialectic-YYYYMMDD-HHMMSS.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::checklist::ChecklistProgress;
use crate::core::health::HealthAlert;
use crate::core::machine::LoopPhase;
use crate::core::types::{Role, RoleInvocation, TurnOutcome, TurnRecord};
use crate::io::workspace::{diagnose_write, write_atomic};

/// Log file location for a run started at `started_at`.
pub fn log_path(workspace: &Path, started_at: DateTime<Utc>) -> PathBuf {
    workspace.join(format!(
        "dialectic-{}.json",
        started_at.format("%Y%m%d-%H%M%S")
    ))
}

/// One entry in the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Turn number; 0 for the initial planning phase.
    pub turn: u32,
    pub phase: LoopPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub input_tokens_est: u64,
    pub output_tokens_est: u64,
    pub total_tokens_est: u64,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl LogEvent {
    pub fn new(turn: u32, phase: LoopPhase, action: impl Into<String>) -> Self {
        Self {
            turn,
            phase,
            role: None,
            model: None,
            action: action.into(),
            outcome: None,
            input_tokens_est: 0,
            output_tokens_est: 0,
            total_tokens_est: 0,
            duration_ms: 0,
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    Approved,
    Exhausted,
    Interrupted,
    Error { message: String },
}

impl Termination {
    pub fn describe(&self) -> String {
        match self {
            Termination::Approved => "approved".to_string(),
            Termination::Exhausted => "turn budget exhausted".to_string(),
            Termination::Interrupted => "interrupted".to_string(),
            Termination::Error { message } => format!("error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStats {
    pub invocations: u32,
    pub failures: u32,
    pub tokens_est: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub turns: u32,
    pub approvals: u32,
    pub rejections: u32,
    pub replans: u32,
    pub parse_failures: u32,
    pub verification_failures: u32,
    pub total_tokens_est: u64,
    /// Keyed by role name.
    pub roles: BTreeMap<String, RoleStats>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<ChecklistProgress>,
    pub alerts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Effective configuration for the run.
    pub config: Value,
    pub events: Vec<LogEvent>,
    pub turns: Vec<TurnRecord>,
    pub alerts: Vec<HealthAlert>,
    pub summary: RunSummary,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    flushed: bool,
}

impl RunLog {
    pub fn new(workspace: &Path, config: &impl Serialize, started_at: DateTime<Utc>) -> Self {
        let config = serde_json::to_value(config).unwrap_or_else(|err| {
            warn!(err = %err, "config could not be captured in the run log");
            Value::Null
        });
        Self {
            run_id: started_at.format("%Y%m%d-%H%M%S").to_string(),
            started_at,
            finished_at: None,
            config,
            events: Vec::new(),
            turns: Vec::new(),
            alerts: Vec::new(),
            summary: RunSummary::default(),
            path: log_path(workspace, started_at),
            flushed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn record(&mut self, event: LogEvent) {
        debug!(
            turn = event.turn,
            phase = event.phase.as_str(),
            action = %event.action,
            outcome = event.outcome.as_deref().unwrap_or(""),
            "log event"
        );
        self.summary.total_tokens_est += event.total_tokens_est;
        self.events.push(event);
    }

    /// Record a role call and fold it into the per-role counters.
    pub fn record_invocation(
        &mut self,
        turn: u32,
        phase: LoopPhase,
        invocation: &RoleInvocation,
        outcome: &str,
        details: Value,
    ) {
        let stats = self
            .summary
            .roles
            .entry(invocation.role.as_str().to_string())
            .or_default();
        stats.invocations += 1;
        stats.tokens_est += invocation.total_tokens_est();
        if invocation.error.is_some() {
            stats.failures += 1;
        }
        self.record(LogEvent {
            role: Some(invocation.role),
            model: Some(invocation.model.clone()),
            outcome: Some(outcome.to_string()),
            input_tokens_est: invocation.input_tokens_est,
            output_tokens_est: invocation.output_tokens_est,
            total_tokens_est: invocation.total_tokens_est(),
            duration_ms: invocation.duration_ms,
            details,
            ..LogEvent::new(turn, phase, "invoke")
        });
    }

    /// Count a parse failure outside a closed turn (planner output).
    pub fn note_parse_failure(&mut self) {
        self.summary.parse_failures += 1;
    }

    /// Store a closed turn and update the outcome counters.
    pub fn record_turn(&mut self, turn: TurnRecord) {
        let summary = &mut self.summary;
        summary.turns = summary.turns.max(turn.index);
        match turn.outcome {
            TurnOutcome::Approved => summary.approvals += 1,
            TurnOutcome::Replanned => summary.replans += 1,
            TurnOutcome::Rejected => summary.rejections += 1,
            TurnOutcome::ParseFailed => {
                summary.rejections += 1;
                summary.parse_failures += 1;
            }
            TurnOutcome::VerificationFailed => {
                summary.rejections += 1;
                summary.verification_failures += 1;
            }
        }
        self.record(
            LogEvent::new(turn.index, LoopPhase::Reviewing, "turn_closed")
                .outcome(outcome_name(turn.outcome))
                .duration_ms(turn.duration_ms)
                .details(serde_json::json!({
                    "files_changed": turn.files_changed,
                    "blocking_issues": turn.blocking_issues,
                })),
        );
        self.turns.push(turn);
    }

    pub fn record_alert(&mut self, phase: LoopPhase, alert: HealthAlert) {
        warn!(kind = ?alert.kind, turn = alert.turn, streak = alert.streak, "{}", alert.message);
        self.summary.alerts += 1;
        let details = serde_json::to_value(&alert).unwrap_or(Value::Null);
        self.record(
            LogEvent::new(alert.turn, phase, "health_alert")
                .outcome(alert.message.clone())
                .details(details),
        );
        self.alerts.push(alert);
    }

    pub fn set_cache_stats(&mut self, hits: u64, misses: u64) {
        self.summary.cache_hits = hits;
        self.summary.cache_misses = misses;
    }

    pub fn set_checklist(&mut self, progress: ChecklistProgress) {
        self.summary.checklist = Some(progress);
    }

    /// Write the log once. Later calls return the path without writing again.
    /// A failed write leaves the log unflushed and carries a write diagnostic.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn finish(&mut self, termination: Termination) -> Result<PathBuf> {
        if self.flushed {
            debug!("run log already written");
            return Ok(self.path.clone());
        }
        self.finished_at = Some(Utc::now());
        self.summary.termination = Some(termination);
        let mut buf = serde_json::to_string_pretty(self).context("serialize run log")?;
        buf.push('\n');
        if let Err(err) = write_atomic(&self.path, buf.as_bytes()) {
            let diag = diagnose_write(&self.path);
            warn!(err = %format!("{err:#}"), %diag, "run log write failed");
            return Err(err.context(format!("write run log {} ({diag})", self.path.display())));
        }
        self.flushed = true;
        info!("run log written");
        Ok(self.path.clone())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let mut log: RunLog =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        log.path = path.to_path_buf();
        log.flushed = true;
        Ok(log)
    }

    /// Condensed multi-line summary printed at the end of a run.
    pub fn render_summary(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![format!("dialectic run {}", self.run_id)];
        if let Some(termination) = &s.termination {
            lines.push(format!("  result:      {}", termination.describe()));
        }
        lines.push(format!(
            "  turns:       {} (approved {}, rejected {}, replans {})",
            s.turns, s.approvals, s.rejections, s.replans
        ));
        lines.push(format!(
            "  failures:    parse {}, verification {}",
            s.parse_failures, s.verification_failures
        ));
        lines.push(format!("  tokens (est): {}", s.total_tokens_est));
        for (role, stats) in &s.roles {
            lines.push(format!(
                "  {role:<12} {} calls, {} failed, ~{} tokens",
                stats.invocations, stats.failures, stats.tokens_est
            ));
        }
        if s.cache_hits + s.cache_misses > 0 {
            lines.push(format!(
                "  cache:       {} hits, {} misses",
                s.cache_hits, s.cache_misses
            ));
        }
        if let Some(progress) = s.checklist {
            lines.push(format!("  checklist:   {progress}"));
        }
        if !self.alerts.is_empty() {
            lines.push(format!("  alerts:      {}", self.alerts.len()));
            for alert in &self.alerts {
                lines.push(format!("    turn {}: {}", alert.turn, alert.message));
            }
        }
        lines.join("\n")
    }
}

fn outcome_name(outcome: TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Approved => "approved",
        TurnOutcome::Rejected => "rejected",
        TurnOutcome::Replanned => "replanned",
        TurnOutcome::ParseFailed => "parse_failed",
        TurnOutcome::VerificationFailed => "verification_failed",
    }
}
