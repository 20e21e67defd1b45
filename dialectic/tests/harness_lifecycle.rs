//! Loop-level harness tests for full run lifecycles.
//!
//! These drive `TurnController::run` with a scripted backend and verifier to
//! check turn accounting, synthetic rejections, replans, health alerts and the
//! run log.

use dialectic::controller::{RunOutcome, RunReport, TurnController};
use dialectic::core::checklist::COMPLETION_MARKER;
use dialectic::core::health::AlertKind;
use dialectic::core::types::{Role, TurnOutcome};
use dialectic::io::cancel::CancelFlag;
use dialectic::io::config::{ContextMode, DialecticConfig};
use dialectic::io::run_log::{RunLog, Termination, log_path};
use dialectic::test_support::{
    ScriptedBackend, ScriptedReply, ScriptedVerifier, TestWorkspace, failing_report,
    implementer_reply, plan_reply, review_reply,
};

const SPEC: &str = "# Plan\n\n- [ ] a\n- [ ] b\n";

fn workspace_with_spec() -> TestWorkspace {
    TestWorkspace::new("Build a tiny library.\n")
        .expect("workspace")
        .with_spec(SPEC)
        .expect("spec")
}

fn run(
    ws: &TestWorkspace,
    cfg: DialecticConfig,
    backend: &ScriptedBackend,
    verifier: &ScriptedVerifier,
) -> RunReport {
    TurnController::new(ws.root(), cfg, backend, verifier, CancelFlag::new())
        .expect("controller")
        .run()
        .expect("run")
}

fn load_log(report: &RunReport) -> RunLog {
    RunLog::load(&report.log_path).expect("load log")
}

fn payload(backend: &ScriptedBackend, index: usize) -> String {
    backend.requests()[index].payload.clone()
}

#[test]
fn approval_on_first_turn_marks_spec_complete() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (
            Role::Implementer,
            implementer_reply(&[("src/lib.rs", "pub fn a() {}\n")]),
        ),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let verifier = ScriptedVerifier::default();

    let report = run(&ws, ws.config(), &backend, &verifier);

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(report.turns, 1);
    assert_eq!(backend.roles(), vec![Role::Implementer, Role::Reviewer]);
    assert_eq!(verifier.runs(), 1);
    assert_eq!(ws.read("src/lib.rs").expect("file"), "pub fn a() {}\n");
    let spec = ws.read("SPECIFICATION.md").expect("spec");
    assert_eq!(spec.lines().last(), Some(COMPLETION_MARKER));

    assert_eq!(ws.run_logs().expect("logs"), vec![report.log_path.clone()]);
    let log = load_log(&report);
    assert_eq!(log.summary.approvals, 1);
    assert_eq!(log.summary.turns, 1);
    assert_eq!(log.summary.termination, Some(Termination::Approved));
    assert_eq!(log.turns[0].files_changed, vec!["src/lib.rs"]);
    assert!(report.summary.contains("approved"));
}

#[test]
fn planning_runs_once_without_consuming_turns() {
    let ws = TestWorkspace::new("Build a tiny library.\n").expect("workspace");
    let backend = ScriptedBackend::new(vec![
        (Role::Planner, plan_reply("# Plan\n\n- [ ] write lib\n")),
        (Role::Implementer, implementer_reply(&[("lib.py", "x = 1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let cfg = DialecticConfig {
        max_turns: 1,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(report.turns, 1);
    let spec = ws.read("SPECIFICATION.md").expect("spec");
    assert!(spec.contains("- [ ] write lib"));
    assert!(spec.contains(COMPLETION_MARKER));

    let log = load_log(&report);
    let planner_event = log
        .events
        .iter()
        .find(|e| e.role == Some(Role::Planner))
        .expect("planner event");
    assert_eq!(planner_event.turn, 0);
    assert_eq!(planner_event.outcome.as_deref(), Some("parsed"));
}

#[test]
fn failed_initial_plan_is_fatal_but_logged() {
    let ws = TestWorkspace::new("Build a tiny library.\n").expect("workspace");
    let backend = ScriptedBackend::new(vec![(
        Role::Planner,
        ScriptedReply::Fail("connection reset".to_string()),
    )]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    match &report.outcome {
        RunOutcome::Failed(message) => assert!(message.contains("initial planning failed")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.turns, 0);
    assert_eq!(backend.roles(), vec![Role::Planner]);
    let log = load_log(&report);
    assert!(matches!(
        log.summary.termination,
        Some(Termination::Error { .. })
    ));
    assert_eq!(log.summary.roles["planner"].failures, 1);
}

#[test]
fn missing_requirements_is_a_setup_error() {
    let ws = workspace_with_spec();
    std::fs::remove_file(ws.root().join("REQUIREMENTS.md")).expect("remove");
    let backend = ScriptedBackend::new(Vec::new());
    let verifier = ScriptedVerifier::default();
    let controller = TurnController::new(ws.root(), ws.config(), &backend, &verifier, CancelFlag::new())
        .expect("controller");
    assert!(controller.run().is_err());
    assert!(ws.run_logs().expect("logs").is_empty());
}

#[test]
fn rejections_exhaust_the_turn_budget() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("REJECTED", &["missing tests"])),
        (Role::Implementer, implementer_reply(&[("a.txt", "2\n")])),
        (Role::Reviewer, review_reply("REJECTED", &["still missing tests"])),
    ]);
    let cfg = DialecticConfig {
        max_turns: 2,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.turns, 2);
    assert!(payload(&backend, 2).contains("1. missing tests"));
    let log = load_log(&report);
    assert_eq!(log.summary.rejections, 2);
    assert_eq!(log.summary.approvals, 0);
    assert_eq!(log.summary.termination, Some(Termination::Exhausted));
}

#[test]
fn planned_run_with_only_rejections_plans_once_and_exhausts() {
    let ws = TestWorkspace::new("Build a tiny library.\n").expect("workspace");
    let mut replies = vec![(Role::Planner, plan_reply("# Plan\n\n- [ ] lib\n"))];
    for turn in 1..=3 {
        replies.push((Role::Implementer, implementer_reply(&[("a.txt", "x\n")])));
        replies.push((
            Role::Reviewer,
            review_reply("REJECTED", &[&format!("issue {turn}")]),
        ));
    }
    let backend = ScriptedBackend::new(replies);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(report.turns, 3);
    assert_eq!(backend.remaining(), 0);
    let planner_calls = backend
        .roles()
        .iter()
        .filter(|role| **role == Role::Planner)
        .count();
    assert_eq!(planner_calls, 1);
    let log = load_log(&report);
    assert_eq!(log.turns.len(), 3);
    assert!(log.turns.iter().all(|t| t.outcome == TurnOutcome::Rejected));
    assert_eq!(log.summary.rejections, 3);
    assert_eq!(log.summary.termination, Some(Termination::Exhausted));
}

#[test]
fn implementer_parse_failure_consumes_turn_and_sends_directive() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (
            Role::Implementer,
            ScriptedReply::Output("I could not decide, sorry.".to_string()),
        ),
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(report.turns, 2);
    assert!(payload(&backend, 1).contains("FORMAT ERROR: your previous implementer response"));

    let log = load_log(&report);
    assert_eq!(log.turns[0].outcome, TurnOutcome::ParseFailed);
    assert_eq!(log.summary.parse_failures, 1);
    let event = log
        .events
        .iter()
        .find(|e| e.outcome.as_deref() == Some("parse_failed"))
        .expect("parse failure event");
    assert_eq!(
        event.details["parse_failure"]["contains_structural_marker"],
        false
    );
    assert_eq!(event.details["parse_failure"]["length"], 26);
}

#[test]
fn reviewer_parse_failure_directs_both_roles() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, ScriptedReply::Output("looks good!".to_string())),
        (Role::Implementer, implementer_reply(&[("a.txt", "2\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    let directive = "FORMAT ERROR: your previous reviewer response";
    assert!(payload(&backend, 2).contains(directive));
    assert!(payload(&backend, 3).contains(directive));
    assert_eq!(load_log(&report).turns[0].outcome, TurnOutcome::ParseFailed);
}

#[test]
fn fast_fail_skips_the_reviewer_and_prioritises_failing_files() {
    let ws = workspace_with_spec();
    let broken = "broken ".repeat(40);
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("src/lib.rs", &broken)])),
        (Role::Implementer, implementer_reply(&[("src/lib.rs", "fixed\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let verifier = ScriptedVerifier::new(vec![failing_report(
        "cargo test",
        "error: expected item\n --> src/lib.rs:1:1\n",
    )]);

    let report = run(&ws, ws.config(), &backend, &verifier);

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(
        backend.roles(),
        vec![Role::Implementer, Role::Implementer, Role::Reviewer]
    );
    let log = load_log(&report);
    assert_eq!(log.turns[0].outcome, TurnOutcome::VerificationFailed);
    assert!(log.turns[0].blocking_issues[0].starts_with("`cargo test` failed (exit code 1)"));
    assert_eq!(log.summary.verification_failures, 1);

    let second = payload(&backend, 1);
    let lib = second.find("--- src/lib.rs ---").expect("lib in snapshot");
    let req = second
        .find("--- REQUIREMENTS.md ---")
        .expect("requirements in snapshot");
    assert!(lib < req);
}

#[test]
fn failing_verification_reaches_reviewer_without_fast_fail() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let verifier = ScriptedVerifier::new(vec![failing_report("npm test", "1 failing")]);
    let mut cfg = ws.config();
    cfg.verification.fast_fail = false;

    let report = run(&ws, cfg, &backend, &verifier);

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert!(payload(&backend, 1).contains("### npm test [FAILED]"));
}

#[test]
fn disabled_verification_never_runs_checks() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let verifier = ScriptedVerifier::default();
    let mut cfg = ws.config();
    cfg.verification.enabled = false;

    let report = run(&ws, cfg, &backend, &verifier);

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(verifier.runs(), 0);
    assert!(payload(&backend, 1).contains("Verification is disabled for this run."));
}

#[test]
fn replan_does_not_consume_a_turn() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("REPLAN_NEEDED", &["spec is wrong"])),
        (Role::Planner, plan_reply("# Plan v2\n\n- [ ] new item\n")),
        (Role::Implementer, implementer_reply(&[("a.txt", "2\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let cfg = DialecticConfig {
        max_turns: 2,
        max_replans: 1,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(report.turns, 2);
    assert!(payload(&backend, 2).contains("spec is wrong"));
    assert!(ws.read("SPECIFICATION.md").expect("spec").contains("- [ ] new item"));
    let log = load_log(&report);
    assert_eq!(log.summary.replans, 1);
    assert_eq!(log.turns[0].outcome, TurnOutcome::Replanned);
}

#[test]
fn replan_past_ceiling_counts_as_rejection() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("REPLAN_NEEDED", &["spec is wrong"])),
        (Role::Implementer, implementer_reply(&[("a.txt", "2\n")])),
        (Role::Reviewer, review_reply("REJECTED", &["not yet"])),
    ]);
    let cfg = DialecticConfig {
        max_turns: 2,
        max_replans: 0,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert!(!backend.roles().contains(&Role::Planner));
    let log = load_log(&report);
    assert_eq!(log.turns[0].outcome, TurnOutcome::Rejected);
    assert!(log.events.iter().any(|e| e.action == "replan_denied"));
    assert_eq!(log.summary.replans, 0);
}

#[test]
fn replan_on_the_last_turn_skips_the_planner() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("REPLAN_NEEDED", &["spec is wrong"])),
    ]);
    let cfg = DialecticConfig {
        max_turns: 1,
        max_replans: 2,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    assert_eq!(backend.roles(), vec![Role::Implementer, Role::Reviewer]);
    let log = load_log(&report);
    assert_eq!(log.turns[0].outcome, TurnOutcome::Rejected);
    let denied = log
        .events
        .iter()
        .find(|e| e.action == "replan_denied")
        .expect("replan denied event");
    assert_eq!(denied.details["reason"], "turn budget spent");
    assert_eq!(log.summary.replans, 0);
}

#[test]
fn zero_edit_alert_fires_once_at_threshold() {
    let ws = workspace_with_spec();
    let mut replies = Vec::new();
    for _ in 0..3 {
        replies.push((Role::Implementer, implementer_reply(&[])));
        replies.push((Role::Reviewer, review_reply("REJECTED", &["nothing changed"])));
    }
    let backend = ScriptedBackend::new(replies);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    let log = load_log(&report);
    let zero_edit: Vec<_> = log
        .alerts
        .iter()
        .filter(|a| a.kind == AlertKind::ZeroEditStreak)
        .collect();
    assert_eq!(zero_edit.len(), 1);
    assert_eq!(zero_edit[0].turn, 2);
    let rejection: Vec<_> = log
        .alerts
        .iter()
        .filter(|a| a.kind == AlertKind::RejectionStreak)
        .collect();
    assert_eq!(rejection.len(), 1);
    assert_eq!(rejection[0].turn, 3);
    assert_eq!(
        log.events.iter().filter(|e| e.action == "health_alert").count(),
        2
    );
}

#[test]
fn invocation_failure_is_a_rejected_turn() {
    let ws = workspace_with_spec();
    let backend = ScriptedBackend::new(vec![
        (
            Role::Implementer,
            ScriptedReply::Fail("implementer invocation timed out after 900s".to_string()),
        ),
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert_eq!(report.turns, 2);
    let log = load_log(&report);
    assert_eq!(log.turns[0].outcome, TurnOutcome::Rejected);
    assert!(log.turns[0].blocking_issues[0].contains("implementer invocation failed"));
    assert_eq!(log.summary.roles["implementer"].failures, 1);
    assert_eq!(log.summary.roles["implementer"].invocations, 2);
}

#[test]
fn interruption_stops_the_loop_and_flushes_the_log() {
    let ws = workspace_with_spec();
    let cancel = CancelFlag::new();
    let backend = ScriptedBackend::new(vec![(
        Role::Implementer,
        implementer_reply(&[("a.txt", "1\n")]),
    )])
    .cancel_after(1, cancel.clone());
    let verifier = ScriptedVerifier::default();

    let report = TurnController::new(ws.root(), ws.config(), &backend, &verifier, cancel)
        .expect("controller")
        .run()
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(backend.roles(), vec![Role::Implementer]);
    assert_eq!(verifier.runs(), 0);
    assert_eq!(ws.run_logs().expect("logs").len(), 1);
    assert_eq!(
        load_log(&report).summary.termination,
        Some(Termination::Interrupted)
    );
}

#[test]
fn unwritable_log_still_reports_the_summary() {
    let ws = workspace_with_spec();
    let now = chrono::Utc::now();
    for offset in -2..30 {
        let blocked = log_path(ws.root(), now + chrono::Duration::seconds(offset));
        std::fs::create_dir_all(&blocked).expect("block log path");
    }
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    let error = report.log_error.as_deref().expect("log error");
    assert!(error.contains("write run log"));
    assert!(error.contains("write_probe="));
    assert!(report.log_path.is_dir());
    assert!(report.summary.contains("approved"));
}

#[test]
fn cache_requires_a_resolving_backend() {
    let ws = workspace_with_spec();
    let mut cfg = ws.config();
    cfg.context.cache = true;
    let verifier = ScriptedVerifier::default();

    let plain = ScriptedBackend::new(Vec::new());
    assert!(
        TurnController::new(ws.root(), cfg.clone(), &plain, &verifier, CancelFlag::new())
            .is_err()
    );

    let resolving = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ])
    .resolving_references();
    let report = run(&ws, cfg, &resolving, &verifier);

    assert_eq!(report.outcome, RunOutcome::Approved);
    assert!(payload(&resolving, 1).contains("[[dialectic-ref:"));
    assert!(load_log(&report).summary.cache_hits > 0);
}

#[test]
fn cache_only_references_blocks_an_earlier_payload_delivered() {
    let ws = workspace_with_spec();
    ws.write("big.md", &"filler line for the snapshot\n".repeat(140))
        .expect("write");
    let mut cfg = ws.config();
    cfg.context.cache = true;
    cfg.prompt_budget_bytes = 3_500;
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ])
    .resolving_references();

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    let first = payload(&backend, 0);
    assert!(first.len() <= 3_500);
    assert!(!first.contains("filler line"));
    assert!(first.contains("Build a tiny library."));
    assert!(!first.contains("[[dialectic-ref:"));
    let second = payload(&backend, 1);
    assert!(second.contains("[[dialectic-ref:"));
    assert!(!second.contains("filler line"));
}

#[test]
fn failed_writes_are_reported_not_fatal() {
    let ws = workspace_with_spec();
    let implementation = r#"```json
{"thought_process": "move and write", "commands_to_run": [],
 "files": {"../escape.txt": "nope\n", "ok.txt": "fine\n"},
 "file_ops": [{"op": "move", "from": "missing.txt", "to": "moved.txt"}]}
```"#;
    let backend = ScriptedBackend::new(vec![
        (
            Role::Implementer,
            ScriptedReply::Output(implementation.to_string()),
        ),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);

    let report = run(&ws, ws.config(), &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Approved);
    let review = payload(&backend, 1);
    assert!(review.contains("Failed mutations:"));
    assert!(review.contains("../escape.txt"));
    assert!(review.contains("move:missing.txt->moved.txt"));
    assert!(review.contains("write_probe=ok"));
    assert_eq!(load_log(&report).turns[0].files_changed, vec!["ok.txt"]);
}

#[test]
fn reviewer_spec_edits_are_persisted() {
    let ws = workspace_with_spec();
    let review = r#"```json
{"status": "REJECTED", "blocking_issues": ["b is open"], "feedback": "do b",
 "specification_edits": [{"find": "- [ ] a", "replace": "- [x] a"}]}
```"#;
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, ScriptedReply::Output(review.to_string())),
    ]);
    let cfg = DialecticConfig {
        max_turns: 1,
        ..ws.config()
    };

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert_eq!(report.outcome, RunOutcome::Exhausted);
    let spec = ws.read("SPECIFICATION.md").expect("spec");
    assert!(spec.contains("- [x] a"));
    assert!(spec.contains("- [ ] b"));
    let checklist = load_log(&report).summary.checklist.expect("checklist");
    assert_eq!((checklist.checked, checklist.total), (1, 2));
}

#[test]
fn changed_mode_falls_back_to_full_without_git() {
    let ws = workspace_with_spec();
    ws.write("notes.md", "context\n").expect("write");
    let backend = ScriptedBackend::new(vec![
        (Role::Implementer, implementer_reply(&[("a.txt", "1\n")])),
        (Role::Reviewer, review_reply("APPROVED", &[])),
    ]);
    let mut cfg = ws.config();
    cfg.context.mode = ContextMode::Changed;

    let report = run(&ws, cfg, &backend, &ScriptedVerifier::default());

    assert!(payload(&backend, 0).contains("--- notes.md ---"));
    let log = load_log(&report);
    let snapshot = log
        .events
        .iter()
        .find(|e| e.action == "context_snapshot")
        .expect("snapshot event");
    assert_eq!(snapshot.details["fell_back_to_full"], true);
    assert_eq!(snapshot.outcome.as_deref(), Some("full"));
}
