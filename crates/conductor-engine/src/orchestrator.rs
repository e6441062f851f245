use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use conductor_core::config::{AppConfig, EngineConfig, ModelConfig};
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::{AiInvoker, ContextService, StateObserver};
use conductor_core::types::{
    ControlAction, ControlRequest, InvokeResult, SegmentKind, SessionId, WorkOrder,
};

use crate::context::{assemble_context, file_references, ContextBundle, ResolvedFiles};
use crate::keyword::{KeywordParser, LeadingKeywordParser};
use crate::manifest::ValidatedManifest;
use crate::payload::ExecutionPayload;
use crate::state::{HaltReason, SessionPhase, SessionState};
use crate::transition::{TransitionEngine, TransitionInput};

/// How a drive of the engine ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The node reached a terminal block.
    Terminal,
    /// Suspended, awaiting resume / retry / abort.
    Halted { reason: HaltReason },
    /// The caller aborted the session; it should be discarded.
    Aborted,
}

/// Entry point of the engine for one worktree session.
///
/// Owns its [`SessionState`] exclusively. Run one orchestrator per session;
/// the collaborators (invoker, context service) may be shared by `Arc`.
pub struct Orchestrator {
    session_id: SessionId,
    manifest: ValidatedManifest,
    context_service: Arc<dyn ContextService>,
    invoker: Arc<dyn AiInvoker>,
    observer: Arc<dyn StateObserver>,
    parser: Arc<dyn KeywordParser>,
    engine: TransitionEngine,
    model: ModelConfig,
    session: Option<SessionState>,
    worktree: PathBuf,
    last_context: Option<ContextBundle>,
}

impl Orchestrator {
    /// Create an orchestrator with default engine limits.
    ///
    /// Taking a [`ValidatedManifest`] means an invalid manifest has already
    /// failed before this point.
    pub fn new(
        manifest: ValidatedManifest,
        context_service: Arc<dyn ContextService>,
        invoker: Arc<dyn AiInvoker>,
        on_state_update: Arc<dyn StateObserver>,
    ) -> Self {
        let parser: Arc<dyn KeywordParser> = Arc::new(LeadingKeywordParser);
        Self {
            session_id: SessionId::new(),
            manifest,
            context_service,
            invoker,
            observer: on_state_update,
            engine: TransitionEngine::new(EngineConfig::default()).with_parser(parser.clone()),
            parser,
            model: ModelConfig::default(),
            session: None,
            worktree: PathBuf::new(),
            last_context: None,
        }
    }

    /// Create an orchestrator using the engine and model sections of `config`.
    pub fn from_config(
        manifest: ValidatedManifest,
        context_service: Arc<dyn ContextService>,
        invoker: Arc<dyn AiInvoker>,
        on_state_update: Arc<dyn StateObserver>,
        config: &AppConfig,
    ) -> Self {
        Self::new(manifest, context_service, invoker, on_state_update)
            .with_engine_config(config.engine.clone())
            .with_model(config.model.clone())
    }

    /// Set engine limits.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = TransitionEngine::new(config).with_parser(self.parser.clone());
        self
    }

    /// Set default model parameters for work orders.
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Replace the keyword extraction strategy.
    pub fn with_parser(mut self, parser: Arc<dyn KeywordParser>) -> Self {
        self.engine = TransitionEngine::new(self.engine.config().clone()).with_parser(parser.clone());
        self.parser = parser;
        self
    }

    /// Use a caller-chosen session id.
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current session state, if a node has been started.
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn phase(&self) -> Option<SessionPhase> {
        self.session.as_ref().map(|s| s.phase)
    }

    pub fn is_halted(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_halted())
    }

    /// The context bundle sent with the most recent AI call.
    pub fn last_context(&self) -> Option<&ContextBundle> {
        self.last_context.as_ref()
    }

    /// Assemble the context the next AI call would receive, given resolved files.
    pub fn preview_context(&self, files: &ResolvedFiles) -> Option<ContextBundle> {
        self.session
            .as_ref()
            .map(|s| assemble_context(&self.manifest, s, files, self.engine.config()))
    }

    /// Run `node_id` from its entry block until it is terminal or halted.
    pub async fn execute_node(&mut self, node_id: &str, worktree: &Path) -> Result<RunOutcome> {
        self.execute_node_with_input(node_id, worktree, None).await
    }

    /// Like [`execute_node`](Self::execute_node), recording `input` as the
    /// first INPUT segment of the node.
    pub async fn execute_node_with_input(
        &mut self,
        node_id: &str,
        worktree: &Path,
        input: Option<&str>,
    ) -> Result<RunOutcome> {
        let node = self
            .manifest
            .node(node_id)
            .ok_or_else(|| ConductorError::UnknownNode(node_id.to_string()))?;

        let window = self.engine.config().primary_window();
        let parent = match self.session.take() {
            Some(prev) if prev.phase == SessionPhase::Running => {
                let id = prev.session_id.to_string();
                self.session = Some(prev);
                return Err(ConductorError::SessionBusy(id));
            }
            Some(prev) => {
                if prev.is_halted() {
                    warn!(
                        session_id = %self.session_id,
                        node_id = %prev.node_id,
                        "Replacing halted session with a new node"
                    );
                }
                Some(prev)
            }
            None => None,
        };

        let payload = match (&parent, node.context_inheritance) {
            (Some(prev), true) if prev.phase != SessionPhase::Aborted => {
                ExecutionPayload::seeded(prev.payload.trailing(window).to_vec())
            }
            _ => ExecutionPayload::new(),
        };

        let mut state = SessionState::new(
            self.session_id.clone(),
            node_id,
            node.entry_block.clone(),
            payload,
        );
        if let Some(text) = input.filter(|t| !t.trim().is_empty()) {
            state.payload.push(SegmentKind::Input, text, None);
        }

        info!(
            session_id = %self.session_id,
            node_id,
            entry_block = %node.entry_block,
            inherited = state.payload.len(),
            worktree = %worktree.display(),
            "Executing node"
        );

        self.worktree = worktree.to_path_buf();
        self.last_context = None;
        self.session = Some(state);
        self.emit();
        self.drive().await
    }

    /// Dispatch a resume / retry / abort request addressed to this session.
    pub async fn handle(&mut self, request: ControlRequest) -> Result<RunOutcome> {
        if request.session_id != self.session_id {
            return Err(ConductorError::InvalidControl {
                session_id: request.session_id.to_string(),
                reason: format!("this orchestrator owns session {}", self.session_id),
            });
        }
        match request.action {
            ControlAction::Resume => self.resume(request.augmented_prompt.as_deref()).await,
            ControlAction::Retry => self.retry(request.augmented_prompt.as_deref()).await,
            ControlAction::Abort => self.abort(),
        }
    }

    /// Clear the halt and re-enter the current block, with `note` injected as
    /// the newest primary-context segment.
    pub async fn resume(&mut self, note: Option<&str>) -> Result<RunOutcome> {
        let state = self.halted_session("resume")?;
        info!(session_id = %state.session_id, block_id = %state.current_block_id, "Resuming halted session");
        state.clear_halt();
        self.inject_note(note);
        self.emit();
        self.drive().await
    }

    /// Re-execute the current block from scratch: drop only that block's most
    /// recent OUTPUT segment, inject `note`, and run again.
    pub async fn retry(&mut self, note: Option<&str>) -> Result<RunOutcome> {
        let state = self.halted_session("retry")?;
        let block = state.current_block_id.clone();
        let discarded = state.payload.remove_last_output_for(&block);
        info!(
            session_id = %state.session_id,
            block_id = %block,
            discarded = discarded.is_some(),
            "Retrying halted block"
        );
        state.clear_halt();
        self.inject_note(note);
        self.emit();
        self.drive().await
    }

    /// Abort the session. Idempotent: a finished or absent session is left as is.
    pub fn abort(&mut self) -> Result<RunOutcome> {
        let Some(state) = self.session.as_mut() else {
            debug!(session_id = %self.session_id, "Abort with no session, nothing to do");
            return Ok(RunOutcome::Aborted);
        };
        match state.phase {
            SessionPhase::Terminal => return Ok(RunOutcome::Terminal),
            SessionPhase::Aborted => return Ok(RunOutcome::Aborted),
            SessionPhase::Running | SessionPhase::Halted => {}
        }
        info!(session_id = %state.session_id, block_id = %state.current_block_id, "Aborting session");
        state.phase = SessionPhase::Aborted;
        state.halt_reason = None;
        self.emit();
        Ok(RunOutcome::Aborted)
    }

    fn halted_session(&mut self, action: &str) -> Result<&mut SessionState> {
        let session_id = self.session_id.to_string();
        match self.session.as_mut() {
            Some(state) if state.is_halted() => Ok(state),
            Some(state) => Err(ConductorError::InvalidControl {
                session_id,
                reason: format!("cannot {} a session in phase {:?}", action, state.phase),
            }),
            None => Err(ConductorError::InvalidControl {
                session_id,
                reason: format!("cannot {}: no session started", action),
            }),
        }
    }

    fn inject_note(&mut self, note: Option<&str>) {
        let Some(state) = self.session.as_mut() else {
            return;
        };
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            let block = state.current_block_id.clone();
            state.payload.push(SegmentKind::Note, note, Some(block.as_str()));
            self.engine.prune(state);
        }
    }

    fn emit(&mut self) {
        if let Some(state) = self.session.as_mut() {
            let snapshot = state.next_snapshot();
            debug!(
                session_id = %snapshot.session_id,
                sequence = snapshot.sequence,
                block_id = %snapshot.current_block_id,
                halted = snapshot.is_halted,
                "Emitting planning snapshot"
            );
            self.observer.on_state_update(&snapshot);
        }
    }

    /// Walk the graph until terminal, halted, or aborted.
    async fn drive(&mut self) -> Result<RunOutcome> {
        let ceiling = self.engine.config().step_ceiling;
        let mut steps = 0usize;

        loop {
            let Some(state) = self.session.as_mut() else {
                return Err(ConductorError::InvalidControl {
                    session_id: self.session_id.to_string(),
                    reason: "no session started".into(),
                });
            };

            match state.phase {
                SessionPhase::Terminal => {
                    info!(session_id = %state.session_id, node_id = %state.node_id, steps, "Node reached terminal block");
                    return Ok(RunOutcome::Terminal);
                }
                SessionPhase::Aborted => return Ok(RunOutcome::Aborted),
                SessionPhase::Halted => {
                    let reason = state
                        .halt_reason
                        .clone()
                        .unwrap_or(HaltReason::Requested { feedback: "halted".into() });
                    info!(session_id = %state.session_id, block_id = %state.current_block_id, reason = %reason, "Session halted");
                    return Ok(RunOutcome::Halted { reason });
                }
                SessionPhase::Running => {}
            }

            if steps >= ceiling {
                warn!(session_id = %state.session_id, ceiling, "Step ceiling reached, halting");
                state.halt(HaltReason::StepCeiling { limit: ceiling });
                self.emit();
                continue;
            }

            let input = self.turn_input().await;

            let Some(state) = self.session.as_mut() else {
                continue;
            };
            if let Some(node) = self.manifest.node(&state.node_id) {
                self.engine.apply(node, state, input);
            } else {
                state.halt(HaltReason::UnrecognizedOutput {
                    output: format!("node '{}' does not exist", state.node_id),
                });
            }
            steps += 1;
            self.emit();
        }
    }

    /// Assemble context for the current block and invoke the AI once.
    async fn turn_input(&mut self) -> TransitionInput {
        let Some(state) = self.session.as_ref() else {
            return TransitionInput::InvocationFailed("no session".into());
        };
        let node = self.manifest.node(&state.node_id);
        let block = node.and_then(|n| n.block(&state.current_block_id));
        let refs = node.map(|n| file_references(n, block)).unwrap_or_default();

        let files = if refs.is_empty() {
            ResolvedFiles::new()
        } else {
            debug!(block_id = %state.current_block_id, files = refs.len(), "Fetching file context");
            match self
                .context_service
                .get_file_context(self.worktree.clone(), refs)
                .await
            {
                Ok(map) => ResolvedFiles::from_map(map),
                Err(e) => {
                    warn!(error = %e, "Context service failed");
                    return TransitionInput::ContextFailed(e.to_string());
                }
            }
        };

        let bundle = assemble_context(&self.manifest, state, &files, self.engine.config());
        for warning in &bundle.warnings {
            warn!(session_id = %state.session_id, block_id = %state.current_block_id, warning = %warning, "Context layer incomplete");
        }

        let order = WorkOrder {
            model: block
                .and_then(|b| b.model.clone())
                .unwrap_or_else(|| self.model.model_id.clone()),
            prompt: bundle.render(),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
        };
        debug!(
            session_id = %state.session_id,
            block_id = %state.current_block_id,
            model = %order.model,
            prompt_chars = order.prompt.len(),
            invoker = self.invoker.name(),
            "Invoking AI"
        );
        self.last_context = Some(bundle);

        match self.invoker.invoke(order).await {
            Ok(InvokeResult {
                success: true,
                content: Some(content),
                ..
            }) => TransitionInput::Output(content),
            Ok(InvokeResult { success: true, .. }) => {
                TransitionInput::InvocationFailed("invoker returned no content".into())
            }
            Ok(InvokeResult { error, .. }) => TransitionInput::InvocationFailed(
                error.unwrap_or_else(|| "unknown invoker error".into()),
            ),
            Err(e) => TransitionInput::InvocationFailed(e.to_string()),
        }
    }
}
