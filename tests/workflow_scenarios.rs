use std::path::Path;
use std::sync::Arc;

use conductor_core::event::SnapshotBus;
use conductor_core::types::{ControlRequest, InvokeResult, SegmentKind, SessionId};
use conductor_engine::manifest::{parse_manifest, ManifestFormat};
use conductor_engine::{
    BlockDefinition, HaltReason, NodeDefinition, Orchestrator, RunOutcome, SessionPhase,
    TransitionRule, ValidatedManifest, WorkflowManifest,
};
use conductor_test_utils::{fixtures, MemoryContextService, RecordingObserver, ScriptedInvoker};

const WORKTREE: &str = "/work/feature-x";

fn review_loop() -> ValidatedManifest {
    parse_manifest(fixtures::REVIEW_LOOP_TOML, ManifestFormat::Toml).unwrap()
}

struct Harness {
    orchestrator: Orchestrator,
    invoker: Arc<ScriptedInvoker>,
    observer: Arc<RecordingObserver>,
    context: Arc<MemoryContextService>,
}

fn harness(manifest: ValidatedManifest, responses: &[&str]) -> Harness {
    harness_with_context(
        manifest,
        responses,
        MemoryContextService::new().with_file("docs/ARCHITECTURE.md", "Hexagonal layers."),
    )
}

fn harness_with_context(
    manifest: ValidatedManifest,
    responses: &[&str],
    context: MemoryContextService,
) -> Harness {
    let invoker = Arc::new(ScriptedInvoker::new(responses));
    let observer = Arc::new(RecordingObserver::new());
    let context = Arc::new(context);
    let orchestrator = Orchestrator::from_config(
        manifest,
        context.clone(),
        invoker.clone(),
        observer.clone(),
        &fixtures::small_config(),
    )
    .with_session_id(SessionId::from_str("session-1"));
    Harness {
        orchestrator,
        invoker,
        observer,
        context,
    }
}

#[tokio::test]
async fn proceed_walks_the_graph_to_terminal() {
    let mut h = harness(review_loop(), &["PROCEED", "PROCEED: tests pass", "Added the flag."]);

    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);

    let last = h.observer.last().unwrap();
    let trail: Vec<&str> = last.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(trail, vec!["draft", "review", "done"]);
    assert!(last.is_terminal);
    assert_eq!(last.last_output.as_deref(), Some("Added the flag."));

    // Work orders carry the configured model.
    assert!(h.invoker.orders().iter().all(|o| o.model == "test-model"));
}

#[tokio::test]
async fn unknown_keyword_without_fallback_halts() {
    let mut h = harness(review_loop(), &["PROCEED", "LGTM"]);

    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    let RunOutcome::Halted { reason } = outcome else {
        panic!("expected halt, got {:?}", outcome);
    };
    assert!(matches!(reason, HaltReason::UnrecognizedOutput { .. }));

    let snapshot = h.observer.last().unwrap();
    assert!(snapshot.is_halted);
    assert_eq!(snapshot.current_block_id, "review");
    assert!(snapshot
        .error_message
        .unwrap()
        .contains("unrecognized output"));
}

#[tokio::test]
async fn call_and_return_resume_the_caller() {
    let mut h = harness(
        review_loop(),
        &["SIDELINE: check the API", "PROCEED: it is v2", "PROCEED", "PROCEED", "ok"],
    );

    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);

    let session = h.orchestrator.session().unwrap();
    assert!(session.return_stack.is_empty());
    assert_eq!(
        session.trail(),
        ["draft", "research", "draft", "review", "done"]
    );

    // The research block saw its own rules, not draft's.
    let research_prompt = &h.invoker.orders()[1].prompt;
    assert!(research_prompt.contains("Report findings only."));
    assert!(!research_prompt.contains("Do not touch generated files."));
}

#[tokio::test]
async fn resume_note_is_newest_primary_segment() {
    let mut h = harness(
        review_loop(),
        &["HALT: need the staging credentials", "PROCEED", "PROCEED", "done"],
    );

    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Halted {
            reason: HaltReason::Requested {
                feedback: "need the staging credentials".into()
            }
        }
    );
    assert_eq!(
        h.observer.last().unwrap().error_message.as_deref(),
        Some("need the staging credentials")
    );

    let outcome = h
        .orchestrator
        .handle(ControlRequest::resume(
            SessionId::from_str("session-1"),
            Some("Use the key in vault/staging".into()),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);

    let resumed_prompt = &h.invoker.orders()[1].prompt;
    let recent = resumed_prompt
        .split("# Recent Context")
        .nth(1)
        .unwrap()
        .split("---")
        .next()
        .unwrap();
    let lines: Vec<&str> = recent.trim().lines().collect();
    assert_eq!(lines.last(), Some(&"[NOTE draft] Use the key in vault/staging"));
}

#[tokio::test]
async fn retry_discards_the_failed_output() {
    let mut h = harness(review_loop(), &["LGTM", "PROCEED", "PROCEED", "done"]);

    h.orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    assert!(h.orchestrator.is_halted());

    let outcome = h
        .orchestrator
        .retry(Some("Start your reply with PROCEED or HALT."))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);

    let session = h.orchestrator.session().unwrap();
    assert!(session
        .payload
        .segments()
        .iter()
        .all(|s| s.content != "LGTM"));
    let retried_prompt = &h.invoker.orders()[1].prompt;
    assert!(!retried_prompt.contains("LGTM"));
    assert!(retried_prompt.contains("Start your reply with PROCEED or HALT."));
}

#[tokio::test]
async fn step_ceiling_halts_cycles() {
    let node = NodeDefinition::new("ping")
        .with_block(
            BlockDefinition::new("ping", "Ping.").with_transition(TransitionRule::jump("PROCEED", "pong")),
        )
        .with_block(
            BlockDefinition::new("pong", "Pong.").with_transition(TransitionRule::jump("PROCEED", "ping")),
        );
    let manifest = ValidatedManifest::new(WorkflowManifest::new().with_node("loop", node)).unwrap();
    let responses = vec!["PROCEED"; 20];
    let mut h = harness(manifest, &responses);

    let outcome = h
        .orchestrator
        .execute_node("loop", Path::new(WORKTREE))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Halted {
            reason: HaltReason::StepCeiling { limit: 6 }
        }
    );
    assert_eq!(h.invoker.calls(), 6);

    // Each drive gets a fresh budget.
    h.orchestrator.resume(None).await.unwrap();
    assert_eq!(h.invoker.calls(), 12);
}

#[tokio::test]
async fn child_node_inherits_trailing_context() {
    let mut h = harness(review_loop(), &["PROCEED: outline ready, three steps", "HALT"]);

    let outcome = h
        .orchestrator
        .execute_node_with_input("plan", Path::new(WORKTREE), Some("Add a --dry-run flag"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);

    h.orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();

    let prompt = &h.invoker.orders()[1].prompt;
    assert!(prompt.contains("outline ready, three steps"));
    assert!(prompt.contains("Hexagonal layers."));
    assert!(prompt.contains("Prefer small functions."));

    let requests = h.context.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, Path::new(WORKTREE));
    assert_eq!(requests[0].1, vec!["docs/ARCHITECTURE.md"]);
}

#[tokio::test]
async fn halt_without_feedback_uses_default_message() {
    let mut h = harness(review_loop(), &["HALT"]);
    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    let RunOutcome::Halted { reason } = outcome else {
        panic!("expected halt");
    };
    assert_eq!(reason.to_string(), "halted by workflow");
}

#[tokio::test]
async fn context_service_failure_halts_before_invoking() {
    let mut h = harness_with_context(
        review_loop(),
        &["PROCEED"],
        MemoryContextService::failing("slicer offline"),
    );
    let outcome = h
        .orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();
    let RunOutcome::Halted { reason } = outcome else {
        panic!("expected halt");
    };
    assert!(matches!(reason, HaltReason::ContextUnavailable { .. }));
    assert!(reason.to_string().contains("slicer offline"));
    assert_eq!(h.invoker.calls(), 0);
}

#[tokio::test]
async fn invoker_failure_takes_default_fallback() {
    let node = NodeDefinition::new("work")
        .with_block(
            BlockDefinition::new("work", "Work.")
                .with_transition(TransitionRule::jump("PROCEED", "done"))
                .with_transition(TransitionRule::jump("ESCALATE", "triage").as_fallback()),
        )
        .with_block(BlockDefinition::new("triage", "Explain the failure."))
        .with_block(BlockDefinition::new("done", "Done."));
    let manifest = ValidatedManifest::new(WorkflowManifest::new().with_node("n", node)).unwrap();

    let invoker = Arc::new(ScriptedInvoker::from_results(vec![
        Ok(InvokeResult::failure("rate limited")),
        Ok(InvokeResult::success("The provider was rate limited.")),
    ]));
    let observer = Arc::new(RecordingObserver::new());
    let mut orchestrator = Orchestrator::new(
        manifest,
        Arc::new(MemoryContextService::new()),
        invoker.clone(),
        observer.clone(),
    );

    let outcome = orchestrator.execute_node("n", Path::new(WORKTREE)).await.unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);
    let session = orchestrator.session().unwrap();
    assert_eq!(session.trail(), ["work", "triage"]);
    let first_output = session
        .payload
        .segments()
        .iter()
        .find(|s| s.kind == SegmentKind::Output)
        .unwrap();
    assert!(first_output.content.contains("rate limited"));
}

#[tokio::test]
async fn snapshots_reach_bus_subscribers_in_order() {
    let bus = Arc::new(SnapshotBus::default());
    let mut rx = bus.subscribe();
    let mut orchestrator = Orchestrator::new(
        review_loop(),
        Arc::new(MemoryContextService::new()),
        Arc::new(ScriptedInvoker::new(&["PROCEED", "PROCEED", "done"])),
        bus.clone(),
    );
    orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();

    let mut sequences = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        sequences.push(snapshot.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn abort_then_start_fresh() {
    let mut h = harness(review_loop(), &["HALT: blocked", "PROCEED: outline"]);
    h.orchestrator
        .execute_node("implement", Path::new(WORKTREE))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.abort().unwrap(), RunOutcome::Aborted);
    assert_eq!(h.orchestrator.abort().unwrap(), RunOutcome::Aborted);
    assert!(h.orchestrator.resume(None).await.is_err());

    let outcome = h
        .orchestrator
        .execute_node("plan", Path::new(WORKTREE))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Terminal);
    assert_eq!(h.orchestrator.phase(), Some(SessionPhase::Terminal));
    // Aborted sessions are not inherited from.
    assert!(!h.invoker.orders()[1].prompt.contains("blocked"));
}
