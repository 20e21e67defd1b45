//! Turn controller: drives Planner, Implementer and Reviewer through the loop
//! until approval, exhaustion or interruption.
//!
//! Phase transitions come from [`MachineState`](crate::core::machine::MachineState);
//! this module performs the side effects of each phase and records them in the
//! [`RunLog`]. All per-run mutable state lives in [`RunSession`].

use std::mem;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::estimate_tokens;
use crate::core::cache::{ContextCache, ensure_compatible};
use crate::core::checklist::{self, ChecklistProgress};
use crate::core::decision::{Decision, ImplementationDecision, ReviewDecision, ReviewStatus};
use crate::core::feedback::{
    fast_fail_rejection, format_directive, invocation_failure_rejection, parse_failure_rejection,
};
use crate::core::health::{HealthMonitor, TurnSignals, VerificationSignal};
use crate::core::machine::{LoopEvent, LoopPhase, MachineState, TurnBudget};
use crate::core::parser::parse_response;
use crate::core::relevance::{OutputPathAnnotator, RelevanceAnnotator};
use crate::core::types::{
    CheckResult, CheckStatus, CommandRun, Role, RoleInvocation, TurnOutcome, TurnRecord,
    VerificationReport,
};
use crate::io::backend::{RoleBackend, RoleRequest};
use crate::io::cancel::CancelFlag;
use crate::io::config::DialecticConfig;
use crate::io::context::{ContextBuilder, ContextSnapshot, resolve_mode};
use crate::io::documents::{read_requirements, read_specification, write_specification};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::run_log::{LogEvent, RunLog, Termination};
use crate::io::verify::{VerificationRequest, Verifier};
use crate::io::workspace::{CommandLimits, MutationReport, Workspace};

/// Turn-history lines shown to the roles.
const HISTORY_LINES: usize = 6;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Approved,
    Exhausted,
    Interrupted,
    /// Fatal error after the run log was opened (e.g. the initial plan failed).
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub turns: u32,
    pub log_path: PathBuf,
    /// Why the log could not be written to `log_path`, if it could not.
    pub log_error: Option<String>,
    /// Condensed summary for stderr.
    pub summary: String,
}

enum Flow {
    Continue,
    Interrupted,
}

/// Mutable state of one run, threaded through every phase.
struct RunSession {
    requirements: String,
    specification: String,
    machine: MachineState,
    health: HealthMonitor,
    cache: ContextCache,
    log: RunLog,
    /// Feedback from the last closed turn, handed to the next Implementer.
    feedback: String,
    planner_directive: String,
    implementer_directive: String,
    reviewer_directive: String,
    replan_reason: String,
    replanned: bool,
    recently_changed: Vec<String>,
    priority: Vec<String>,
    history: Vec<String>,
}

impl RunSession {
    fn history(&self) -> String {
        let skip = self.history.len().saturating_sub(HISTORY_LINES);
        self.history[skip..].join("\n")
    }
}

/// Everything a closed turn needs to be recorded.
struct ClosedTurn {
    index: u32,
    role: Role,
    outcome: TurnOutcome,
    started: Instant,
    invocations: Vec<RoleInvocation>,
    review: ReviewDecision,
    mutations: Option<MutationReport>,
    verification: Option<VerificationReport>,
    zero_edit: Option<bool>,
    verification_signal: VerificationSignal,
}

pub struct TurnController<'a, B: RoleBackend, V: Verifier> {
    root: PathBuf,
    config: DialecticConfig,
    backend: &'a B,
    verifier: &'a V,
    annotator: Box<dyn RelevanceAnnotator + 'a>,
    cancel: CancelFlag,
    prompts: PromptBuilder,
    contexts: ContextBuilder,
    workspace: Workspace,
}

impl<'a, B: RoleBackend, V: Verifier> TurnController<'a, B, V> {
    /// Validate configuration and wire the controller. Fails before any turn runs.
    pub fn new(
        root: &Path,
        config: DialecticConfig,
        backend: &'a B,
        verifier: &'a V,
        cancel: CancelFlag,
    ) -> Result<Self> {
        config.validate()?;
        ensure_compatible(config.context.cache, backend.resolves_references())?;
        let mut prompts = PromptBuilder::new(config.prompt_budget_bytes);
        if let Some(dir) = &config.prompts_dir {
            prompts = prompts.with_overrides(&root.join(dir))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            contexts: ContextBuilder::new(root, config.context.clone()),
            workspace: Workspace::new(root),
            config,
            backend,
            verifier,
            annotator: Box::new(OutputPathAnnotator),
            cancel,
            prompts,
        })
    }

    pub fn with_annotator(mut self, annotator: Box<dyn RelevanceAnnotator + 'a>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Run the loop to completion. Errors are setup errors raised before the
    /// run log exists; later failures end the run with [`RunOutcome::Failed`].
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn run(&self) -> Result<RunReport> {
        let requirements = read_requirements(&self.root.join(&self.config.requirements_path))?;
        let existing = read_specification(&self.root.join(&self.config.specification_path))?;
        let needs_plan = existing.is_none() && !self.config.skip_planning;
        if existing.is_none() && self.config.skip_planning {
            warn!("no specification found and planning is skipped; implementing from requirements");
        }

        let budget = TurnBudget {
            max_turns: self.config.max_turns,
            max_replans: self.config.max_replans,
        };
        let mut session = RunSession {
            requirements,
            specification: existing.unwrap_or_default(),
            machine: MachineState::new(budget, needs_plan),
            health: HealthMonitor::new(self.config.health),
            cache: ContextCache::new(self.config.context.cache),
            log: RunLog::new(&self.root, &self.config, Utc::now()),
            feedback: String::new(),
            planner_directive: String::new(),
            implementer_directive: String::new(),
            reviewer_directive: String::new(),
            replan_reason: String::new(),
            replanned: false,
            recently_changed: Vec::new(),
            priority: Vec::new(),
            history: Vec::new(),
        };
        session.log.record(
            LogEvent::new(0, session.machine.phase, "run_started").details(json!({
                "needs_plan": needs_plan,
                "max_turns": budget.max_turns,
                "max_replans": budget.max_replans,
            })),
        );
        info!(needs_plan, max_turns = budget.max_turns, "run started");

        let outcome = match self.drive(&mut session) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "run failed");
                session.log.record(
                    LogEvent::new(session.machine.turn, session.machine.phase, "fatal_error")
                        .outcome(format!("{err:#}")),
                );
                RunOutcome::Failed(format!("{err:#}"))
            }
        };
        self.finish(session, outcome)
    }

    fn drive(&self, session: &mut RunSession) -> Result<RunOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            let flow = match session.machine.phase {
                LoopPhase::Planning | LoopPhase::Replanning => self.plan(session)?,
                LoopPhase::Implementing => self.turn(session)?,
                LoopPhase::Reviewing => bail!("reviewing phase reached outside a turn"),
                LoopPhase::Done => return Ok(RunOutcome::Approved),
                LoopPhase::Exhausted => return Ok(RunOutcome::Exhausted),
            };
            if let Flow::Interrupted = flow {
                return Ok(RunOutcome::Interrupted);
            }
        }
    }

    fn finish(&self, mut session: RunSession, outcome: RunOutcome) -> Result<RunReport> {
        let termination = match &outcome {
            RunOutcome::Approved => Termination::Approved,
            RunOutcome::Exhausted => Termination::Exhausted,
            RunOutcome::Interrupted => Termination::Interrupted,
            RunOutcome::Failed(message) => Termination::Error {
                message: message.clone(),
            },
        };
        session
            .log
            .set_cache_stats(session.cache.hits, session.cache.misses);
        let progress: ChecklistProgress = checklist::progress(&session.specification);
        if progress.total > 0 {
            session.log.set_checklist(progress);
        }
        let log_error = match session.log.finish(termination) {
            Ok(_) => None,
            Err(err) => {
                error!(err = %format!("{err:#}"), "run log not written");
                Some(format!("{err:#}"))
            }
        };
        info!(outcome = ?outcome, turns = session.machine.turn, "run finished");
        Ok(RunReport {
            outcome,
            turns: session.machine.turn,
            log_path: session.log.path().to_path_buf(),
            log_error,
            summary: session.log.render_summary(),
        })
    }

    /// Call the backend for `role`, timing the call and estimating its cost.
    fn invoke(&self, role: Role, payload: String) -> (RoleInvocation, Result<String>) {
        let model = self.config.models.for_role(role).to_string();
        let request = RoleRequest {
            role,
            model: model.clone(),
            workdir: self.root.clone(),
            timeout: Duration::from_secs(self.config.backend.timeout_secs),
            payload,
        };
        let started = Instant::now();
        let result = self.backend.invoke(&request);
        let duration_ms = started.elapsed().as_millis() as u64;
        let output = result.as_ref().map(String::clone).unwrap_or_default();
        let invocation = RoleInvocation {
            role,
            model,
            input_bytes: request.payload.len(),
            input_tokens_est: estimate_tokens(&request.payload),
            output_tokens_est: if result.is_ok() {
                estimate_tokens(&output)
            } else {
                0
            },
            output,
            duration_ms,
            error: result.as_ref().err().map(|err| format!("{err:#}")),
        };
        (invocation, result)
    }

    /// Log an invocation together with how its output was classified.
    fn record_invocation(
        &self,
        session: &mut RunSession,
        phase: LoopPhase,
        invocation: &RoleInvocation,
        decision: Option<&Decision>,
    ) {
        let (outcome, details) = match (decision, &invocation.error) {
            (_, Some(err)) => ("failed", json!({ "error": err })),
            (Some(Decision::ParseFailed(failure)), None) => {
                ("parse_failed", json!({ "parse_failure": failure }))
            }
            (Some(_), None) => ("parsed", json!({ "output_bytes": invocation.output.len() })),
            (None, None) => ("completed", serde_json::Value::Null),
        };
        session.log.record_invocation(
            session.machine.turn,
            phase,
            invocation,
            outcome,
            details,
        );
    }

    /// Render a payload and commit the cache blocks it actually delivers.
    fn build_payload(
        &self,
        session: &mut RunSession,
        role: Role,
        inputs: &PromptInputs,
    ) -> Result<String> {
        let payload = self.prompts.build(role, inputs)?;
        if session.cache.is_enabled() {
            let committed = session.cache.commit(&payload);
            debug!(role = %role, committed, cached = session.cache.len(), "cache commit");
        }
        Ok(payload)
    }

    /// Initial planning (turn 0) or a replan after a Reviewer request.
    #[instrument(skip_all, fields(phase = session.machine.phase.as_str()))]
    fn plan(&self, session: &mut RunSession) -> Result<Flow> {
        let phase = session.machine.phase;
        let replanning = phase == LoopPhase::Replanning;
        let inputs = PromptInputs {
            turn: session.machine.turn,
            max_turns: self.config.max_turns,
            requirements: session.cache.encode("requirements", &session.requirements),
            specification: if replanning {
                session
                    .cache
                    .encode("specification", &session.specification)
            } else {
                String::new()
            },
            replan_reason: session.replan_reason.clone(),
            directive: mem::take(&mut session.planner_directive),
            ..PromptInputs::default()
        };
        let payload = self.build_payload(session, Role::Planner, &inputs)?;
        let (invocation, result) = self.invoke(Role::Planner, payload);
        if self.cancel.is_cancelled() {
            self.record_invocation(session, phase, &invocation, None);
            return Ok(Flow::Interrupted);
        }

        let decision = result.ok().map(|text| parse_response(Role::Planner, &text));
        self.record_invocation(session, phase, &invocation, decision.as_ref());

        let event = match decision {
            Some(Decision::Plan(plan)) => {
                session.specification = plan.specification;
                self.persist_specification(session);
                info!(
                    progress = %checklist::progress(&session.specification),
                    "specification produced"
                );
                LoopEvent::PlanProduced
            }
            Some(Decision::ParseFailed(failure)) => {
                session.log.note_parse_failure();
                session.planner_directive = format_directive(&failure);
                warn!(reason = %failure.reason, "planner output could not be parsed");
                LoopEvent::PlanFailed
            }
            Some(_) => bail!("planner produced a non-plan decision"),
            None => {
                warn!(error = invocation.error.as_deref().unwrap_or(""), "planner invocation failed");
                LoopEvent::PlanFailed
            }
        };
        if replanning && event == LoopEvent::PlanFailed {
            warn!("replan failed; keeping the previous specification");
        }
        let transition = session.machine.apply(event)?;
        if replanning {
            session.replan_reason.clear();
            session.replanned = true;
            session.history.push(format!(
                "replan after turn {}: {}",
                session.machine.turn,
                if event == LoopEvent::PlanProduced {
                    "new specification"
                } else {
                    "failed, kept previous specification"
                }
            ));
        }
        debug!(from = %transition.from, to = %transition.to, "planning finished");
        Ok(Flow::Continue)
    }

    /// One Implementer/Reviewer turn.
    #[instrument(skip_all, fields(turn = tracing::field::Empty))]
    fn turn(&self, session: &mut RunSession) -> Result<Flow> {
        let started = Instant::now();
        let turn = session.machine.begin_turn()?;
        tracing::Span::current().record("turn", turn);

        let mode = resolve_mode(self.config.context.mode, turn, session.replanned);
        session.replanned = false;
        let snapshot = self
            .contexts
            .build(mode, &session.recently_changed, &session.priority)
            .context("build context snapshot")?;
        self.record_snapshot(session, turn, &snapshot);

        let context = snapshot.render(&mut session.cache);
        let inputs = PromptInputs {
            turn,
            max_turns: self.config.max_turns,
            requirements: session.cache.encode("requirements", &session.requirements),
            specification: session
                .cache
                .encode("specification", &session.specification),
            directive: mem::take(&mut session.implementer_directive),
            feedback: session.feedback.clone(),
            context,
            context_mode: snapshot.mode.as_str().to_string(),
            history: session.history(),
            ..PromptInputs::default()
        };
        let payload = self.build_payload(session, Role::Implementer, &inputs)?;
        let (invocation, result) = self.invoke(Role::Implementer, payload);
        if self.cancel.is_cancelled() {
            self.record_invocation(session, LoopPhase::Implementing, &invocation, None);
            return Ok(Flow::Interrupted);
        }
        let decision = result
            .as_ref()
            .ok()
            .map(|text| parse_response(Role::Implementer, text));
        self.record_invocation(
            session,
            LoopPhase::Implementing,
            &invocation,
            decision.as_ref(),
        );
        let mut invocations = vec![invocation];

        let implementation = match decision {
            Some(Decision::Implementation(implementation)) => implementation,
            Some(Decision::ParseFailed(failure)) => {
                warn!(reason = %failure.reason, "implementer output could not be parsed");
                session.implementer_directive = format_directive(&failure);
                session.machine.apply(LoopEvent::ImplementationFailed)?;
                self.close_turn(
                    session,
                    ClosedTurn {
                        index: turn,
                        role: Role::Implementer,
                        outcome: TurnOutcome::ParseFailed,
                        started,
                        invocations,
                        review: parse_failure_rejection(&failure),
                        mutations: None,
                        verification: None,
                        zero_edit: None,
                        verification_signal: VerificationSignal::NotRun,
                    },
                );
                return Ok(Flow::Continue);
            }
            Some(_) => bail!("implementer produced a non-implementation decision"),
            None => {
                let error = invocations[0].error.clone().unwrap_or_default();
                warn!(error = %error, "implementer invocation failed");
                session.machine.apply(LoopEvent::ImplementationFailed)?;
                self.close_turn(
                    session,
                    ClosedTurn {
                        index: turn,
                        role: Role::Implementer,
                        outcome: TurnOutcome::Rejected,
                        started,
                        invocations,
                        review: invocation_failure_rejection(Role::Implementer, &error),
                        mutations: None,
                        verification: None,
                        zero_edit: None,
                        verification_signal: VerificationSignal::NotRun,
                    },
                );
                return Ok(Flow::Continue);
            }
        };

        let mutations = self.workspace.apply(&implementation);
        session.recently_changed = mutations.changed.clone();
        session.log.record(
            LogEvent::new(turn, LoopPhase::Implementing, "apply_mutations")
                .outcome(if mutations.failures.is_empty() {
                    "ok"
                } else {
                    "partial"
                })
                .details(json!({
                    "changed": mutations.changed,
                    "failures": mutations.failures,
                    "zero_edit": implementation.is_zero_edit(),
                })),
        );

        let command_runs = self.run_implementer_commands(session, turn, &implementation);
        let (report, verified) = self.verify(session, turn);
        session.priority = if report.failed() {
            let known = self.contexts.known_files().unwrap_or_default();
            let hints = self.annotator.annotate(&report, &known);
            if !hints.is_empty() {
                debug!(annotator = self.annotator.name(), hints = ?hints, "relevance hints");
            }
            hints
        } else {
            Vec::new()
        };
        if self.cancel.is_cancelled() {
            return Ok(Flow::Interrupted);
        }

        let fast_failed = verified && report.failed() && self.config.verification.fast_fail;
        let verification_signal = match (verified, report.failed(), fast_failed) {
            (false, _, _) => VerificationSignal::NotRun,
            (true, false, _) => VerificationSignal::Passed,
            (true, true, true) => VerificationSignal::ShortCircuited,
            (true, true, false) => VerificationSignal::Failed,
        };
        session
            .machine
            .apply(LoopEvent::ImplementationReady { fast_failed })?;

        if fast_failed {
            info!(turn, "verification failed, skipping review");
            self.close_turn(
                session,
                ClosedTurn {
                    index: turn,
                    role: Role::Implementer,
                    outcome: TurnOutcome::VerificationFailed,
                    started,
                    invocations,
                    review: fast_fail_rejection(&report),
                    mutations: Some(mutations),
                    verification: Some(report),
                    zero_edit: Some(implementation.is_zero_edit()),
                    verification_signal,
                },
            );
            return Ok(Flow::Continue);
        }

        let inputs = PromptInputs {
            turn,
            max_turns: self.config.max_turns,
            requirements: session.cache.encode("requirements", &session.requirements),
            specification: session
                .cache
                .encode("specification", &session.specification),
            directive: mem::take(&mut session.reviewer_directive),
            implementation: render_implementation(&implementation, &mutations),
            verification: if verified {
                report.render()
            } else {
                String::new()
            },
            commands: CommandRun::render(&command_runs),
            history: session.history(),
            context: snapshot.render(&mut session.cache),
            context_mode: snapshot.mode.as_str().to_string(),
            ..PromptInputs::default()
        };
        let payload = self.build_payload(session, Role::Reviewer, &inputs)?;
        let (invocation, result) = self.invoke(Role::Reviewer, payload);
        if self.cancel.is_cancelled() {
            self.record_invocation(session, LoopPhase::Reviewing, &invocation, None);
            return Ok(Flow::Interrupted);
        }
        let decision = result
            .as_ref()
            .ok()
            .map(|text| parse_response(Role::Reviewer, text));
        self.record_invocation(session, LoopPhase::Reviewing, &invocation, decision.as_ref());
        invocations.push(invocation);

        let (outcome, review) = match decision {
            Some(Decision::Review(review)) => {
                let outcome = self.apply_review(session, turn, &review)?;
                (outcome, review)
            }
            Some(Decision::ParseFailed(failure)) => {
                warn!(reason = %failure.reason, "reviewer output could not be parsed");
                let directive = format_directive(&failure);
                session.reviewer_directive = directive.clone();
                session.implementer_directive = directive;
                session.machine.apply(LoopEvent::ReviewRejected)?;
                (TurnOutcome::ParseFailed, parse_failure_rejection(&failure))
            }
            Some(_) => bail!("reviewer produced a non-review decision"),
            None => {
                let error = invocations[1].error.clone().unwrap_or_default();
                warn!(error = %error, "reviewer invocation failed");
                session.machine.apply(LoopEvent::ReviewRejected)?;
                (
                    TurnOutcome::Rejected,
                    invocation_failure_rejection(Role::Reviewer, &error),
                )
            }
        };

        self.close_turn(
            session,
            ClosedTurn {
                index: turn,
                role: Role::Reviewer,
                outcome,
                started,
                invocations,
                review,
                mutations: Some(mutations),
                verification: verified.then_some(report),
                zero_edit: Some(implementation.is_zero_edit()),
                verification_signal,
            },
        );
        Ok(Flow::Continue)
    }

    fn record_snapshot(&self, session: &mut RunSession, turn: u32, snapshot: &ContextSnapshot) {
        session.log.record(
            LogEvent::new(turn, LoopPhase::Implementing, "context_snapshot")
                .outcome(snapshot.mode.as_str())
                .details(json!({
                    "files": snapshot.paths(),
                    "skipped": snapshot.skipped,
                    "total_bytes": snapshot.total_bytes,
                    "truncated": snapshot.truncated,
                    "fell_back_to_full": snapshot.fell_back_to_full,
                })),
        );
    }

    fn run_implementer_commands(
        &self,
        session: &mut RunSession,
        turn: u32,
        implementation: &ImplementationDecision,
    ) -> Vec<CommandRun> {
        if implementation.commands_to_run.is_empty() {
            return Vec::new();
        }
        if !self.config.allow_implementer_commands {
            info!(
                count = implementation.commands_to_run.len(),
                "implementer commands disabled, not running"
            );
            return Vec::new();
        }
        let verify = &self.config.verification;
        let runs = self.workspace.run_commands(
            &implementation.commands_to_run,
            CommandLimits {
                timeout: Duration::from_secs(self.config.implementer_command_timeout_secs),
                output_limit_bytes: verify.output_limit_bytes,
                head_lines: verify.output_head_lines,
                tail_lines: verify.output_tail_lines,
            },
            &self.cancel,
        );
        session.log.record(
            LogEvent::new(turn, LoopPhase::Implementing, "implementer_commands").details(json!(
                runs.iter()
                    .map(|r| json!({
                        "command": r.command,
                        "exit_code": r.exit_code,
                        "timed_out": r.timed_out,
                    }))
                    .collect::<Vec<_>>()
            )),
        );
        runs
    }

    /// Run verification. Returns the report and whether verification ran at all.
    fn verify(&self, session: &mut RunSession, turn: u32) -> (VerificationReport, bool) {
        if !self.config.verification.enabled {
            return (VerificationReport::empty(), false);
        }
        let started = Instant::now();
        let request = VerificationRequest::from_config(&self.root, &self.config.verification);
        let report = match self.verifier.run(&request) {
            Ok(report) => report,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "verification runner failed");
                VerificationReport {
                    checks: vec![CheckResult {
                        name: "verification".to_string(),
                        command: String::new(),
                        status: CheckStatus::Failed,
                        exit_code: None,
                        timed_out: false,
                        output: format!("verification could not run: {err:#}"),
                        skip_reason: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    }],
                }
            }
        };
        session.log.record(
            LogEvent::new(turn, LoopPhase::Implementing, "verification")
                .outcome(if report.failed() { "failed" } else { "passed" })
                .duration_ms(started.elapsed().as_millis() as u64)
                .details(json!(
                    report
                        .checks
                        .iter()
                        .map(|c| json!({
                            "name": c.name,
                            "command": c.command,
                            "status": c.status,
                            "exit_code": c.exit_code,
                            "timed_out": c.timed_out,
                            "skip_reason": c.skip_reason,
                            "duration_ms": c.duration_ms,
                        }))
                        .collect::<Vec<_>>()
                )),
        );
        (report, true)
    }

    /// Apply specification edits and the verdict. Returns the turn outcome.
    fn apply_review(
        &self,
        session: &mut RunSession,
        turn: u32,
        review: &ReviewDecision,
    ) -> Result<TurnOutcome> {
        let mut spec_changed = false;
        if !review.specification_edits.is_empty() {
            let edited = checklist::apply_edits(&session.specification, &review.specification_edits);
            if !edited.missing.is_empty() {
                warn!(missing = edited.missing.len(), "some specification edits did not match");
            }
            session.log.record(
                LogEvent::new(turn, LoopPhase::Reviewing, "specification_edits").details(json!({
                    "applied": edited.applied,
                    "missing": edited.missing,
                })),
            );
            spec_changed = edited.applied > 0;
            session.specification = edited.text;
        }

        let outcome = match review.status {
            ReviewStatus::Approved => {
                session.machine.apply(LoopEvent::ReviewApproved)?;
                session.specification = checklist::mark_complete(&session.specification);
                spec_changed = true;
                TurnOutcome::Approved
            }
            ReviewStatus::Rejected => {
                session.machine.apply(LoopEvent::ReviewRejected)?;
                TurnOutcome::Rejected
            }
            ReviewStatus::ReplanNeeded => {
                let transition = session.machine.apply(LoopEvent::ReplanRequested)?;
                if transition.to == LoopPhase::Replanning {
                    session.replan_reason = review.render_feedback();
                    TurnOutcome::Replanned
                } else {
                    let reason = if transition.to == LoopPhase::Exhausted {
                        "turn budget spent"
                    } else {
                        "replan ceiling reached"
                    };
                    info!(
                        max_replans = self.config.max_replans,
                        reason,
                        "replan denied, treating as rejection"
                    );
                    session.log.record(
                        LogEvent::new(turn, LoopPhase::Reviewing, "replan_denied")
                            .outcome("rejected")
                            .details(json!({ "reason": reason })),
                    );
                    TurnOutcome::Rejected
                }
            }
        };
        if spec_changed {
            self.persist_specification(session);
        }
        Ok(outcome)
    }

    /// Write the specification. A failure is logged with its write
    /// diagnostic, never fatal.
    fn persist_specification(&self, session: &mut RunSession) {
        let path = self.root.join(&self.config.specification_path);
        if let Err(err) = write_specification(&path, &session.specification) {
            warn!(err = %format!("{err:#}"), "could not write specification");
            session.log.record(
                LogEvent::new(session.machine.turn, session.machine.phase, "specification_write")
                    .outcome("failed")
                    .details(json!({ "error": format!("{err:#}") })),
            );
        }
    }

    fn close_turn(&self, session: &mut RunSession, closed: ClosedTurn) {
        let mut feedback = closed.review.render_feedback();
        if let Some(mutations) = closed
            .mutations
            .as_ref()
            .filter(|m| !m.failures.is_empty())
        {
            feedback.push_str("\n\n");
            feedback.push_str(&mutations.render());
        }
        session.feedback = feedback.clone();

        let record = TurnRecord {
            index: closed.index,
            role: closed.role,
            outcome: closed.outcome,
            duration_ms: closed.started.elapsed().as_millis() as u64,
            invocations: closed.invocations,
            files_changed: closed
                .mutations
                .map(|m| m.changed)
                .unwrap_or_default(),
            verification: closed.verification,
            feedback,
            blocking_issues: closed.review.blocking_issues,
        };
        info!(
            turn = record.index,
            outcome = ?record.outcome,
            files_changed = record.files_changed.len(),
            duration_ms = record.duration_ms,
            "turn closed"
        );
        session.history.push(format!(
            "turn {}: {:?}, {} file(s) changed, {} blocking issue(s)",
            record.index,
            record.outcome,
            record.files_changed.len(),
            record.blocking_issues.len()
        ));

        let alerts = session.health.observe_turn(TurnSignals {
            turn: record.index,
            approved: record.outcome == TurnOutcome::Approved,
            rejected: record.outcome.is_rejection(),
            zero_edit: closed.zero_edit,
            verification: closed.verification_signal,
        });
        session.log.record_turn(record);
        for alert in alerts {
            session.log.record_alert(session.machine.phase, alert);
        }
    }
}

/// Implementer summary shown to the Reviewer.
fn render_implementation(decision: &ImplementationDecision, mutations: &MutationReport) -> String {
    let mut buf = String::new();
    if !decision.thought_process.trim().is_empty() {
        buf.push_str("Implementer notes:\n");
        buf.push_str(decision.thought_process.trim());
        buf.push_str("\n\n");
    }
    if !decision.file_ops.is_empty() {
        buf.push_str("Requested file operations:\n");
        for op in &decision.file_ops {
            buf.push_str(&format!("- {}\n", op.describe()));
        }
        buf.push('\n');
    }
    buf.push_str(&mutations.render());
    buf
}
