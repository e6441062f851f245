//! Transition engine: interprets AI output and advances session state.
//!
//! One state per `(node, block)` pair plus the `Halted` and `Terminal`
//! pseudo-states. Given the output of the current block:
//!
//! 1. extract the leading keyword (injectable [`KeywordParser`]);
//! 2. run the matching rule's action (JUMP / CALL / RETURN / HALT / COMPLETE);
//! 3. otherwise run the block's default fallback, or halt (strict policy);
//! 4. record an OUTPUT segment and prune the payload.
//!
//! Failed AI or context calls enter at step 3.

use std::sync::Arc;

use tracing::{debug, info, warn};

use conductor_core::config::EngineConfig;
use conductor_core::types::{BlockId, SegmentKind};

use crate::keyword::{KeywordParser, LeadingKeywordParser};
use crate::manifest::{NodeDefinition, TransitionAction, TransitionRule, KEYWORD_REDO};
use crate::state::{HaltReason, SessionPhase, SessionState};

const DEFAULT_HALT_MESSAGE: &str = "halted by workflow";

/// Input to one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionInput {
    /// Raw text returned by the AI for the current block.
    Output(String),
    /// The AI invoker failed.
    InvocationFailed(String),
    /// The context service failed before the AI could be called.
    ContextFailed(String),
}

impl TransitionInput {
    fn failure_reason(&self) -> Option<HaltReason> {
        match self {
            Self::Output(_) => None,
            Self::InvocationFailed(error) => Some(HaltReason::InvocationFailed { error: error.clone() }),
            Self::ContextFailed(error) => Some(HaltReason::ContextUnavailable { error: error.clone() }),
        }
    }

    /// Text recorded in the OUTPUT segment for this turn.
    fn record_text(&self) -> String {
        match self {
            Self::Output(text) => text.clone(),
            Self::InvocationFailed(error) => format!("AI invocation failed: {}", error),
            Self::ContextFailed(error) => format!("file context unavailable: {}", error),
        }
    }
}

/// What a transition did.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub from_block: BlockId,
    pub to_block: BlockId,
    /// Keyword of the rule that fired, if any.
    pub keyword: Option<String>,
    pub via_fallback: bool,
    pub phase: SessionPhase,
}

/// Applies transition rules to a session.
pub struct TransitionEngine {
    parser: Arc<dyn KeywordParser>,
    config: EngineConfig,
}

impl TransitionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            parser: Arc::new(LeadingKeywordParser),
            config,
        }
    }

    /// Replace the keyword extraction strategy.
    pub fn with_parser(mut self, parser: Arc<dyn KeywordParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advance `state` by one transition of the current block of `node`.
    pub fn apply(
        &self,
        node: &NodeDefinition,
        state: &mut SessionState,
        input: TransitionInput,
    ) -> TransitionOutcome {
        let from_block = state.current_block_id.clone();
        let record = input.record_text();
        let mut keyword = None;
        let mut via_fallback = false;
        let mut redo_note = None;

        match node.block(&from_block) {
            None => {
                warn!(block_id = %from_block, "Current block missing from node, halting");
                state.halt(HaltReason::UnrecognizedOutput {
                    output: format!("current block '{}' does not exist", from_block),
                });
            }
            Some(block) => match &input {
                TransitionInput::Output(_) if block.is_terminal() => {
                    debug!(block_id = %from_block, "Terminal block produced output");
                    state.phase = SessionPhase::Terminal;
                }
                TransitionInput::Output(text) => {
                    let parsed = self.parser.parse(text);
                    let matched = parsed
                        .as_ref()
                        .and_then(|p| block.rule_for(&p.keyword).map(|rule| (rule, p.feedback.clone())));

                    match matched {
                        Some((rule, feedback)) => {
                            keyword = Some(rule.keyword.clone());
                            redo_note = redo_feedback(rule, &feedback);
                            self.execute(rule, state, &feedback);
                        }
                        None => match block.default_fallback() {
                            Some(rule) => {
                                debug!(
                                    block_id = %from_block,
                                    fallback = %rule.keyword,
                                    "Output matched no keyword, using default fallback"
                                );
                                keyword = Some(rule.keyword.clone());
                                via_fallback = true;
                                redo_note = redo_feedback(rule, text.trim());
                                self.execute(rule, state, text.trim());
                            }
                            None => {
                                warn!(
                                    block_id = %from_block,
                                    token = parsed.as_ref().map(|p| p.keyword.as_str()).unwrap_or(""),
                                    "Unrecognized output and no default fallback, halting"
                                );
                                state.halt(HaltReason::UnrecognizedOutput { output: text.clone() });
                            }
                        },
                    }
                }
                failure => {
                    let reason = failure.failure_reason().unwrap_or(HaltReason::UnrecognizedOutput {
                        output: record.clone(),
                    });
                    match block.default_fallback() {
                        Some(rule) => {
                            warn!(block_id = %from_block, fallback = %rule.keyword, reason = %reason, "External call failed, using default fallback");
                            keyword = Some(rule.keyword.clone());
                            via_fallback = true;
                            let reason = reason.to_string();
                            redo_note = redo_feedback(rule, &reason);
                            self.execute(rule, state, &reason);
                        }
                        None => {
                            warn!(block_id = %from_block, reason = %reason, "External call failed, halting");
                            state.halt(reason);
                        }
                    }
                }
            },
        }

        state
            .payload
            .push(SegmentKind::Output, record, Some(from_block.as_str()));
        if let Some(note) = redo_note {
            let current = state.current_block_id.clone();
            state.payload.push(SegmentKind::Note, note, Some(current.as_str()));
        }
        self.prune(state);

        let outcome = TransitionOutcome {
            from_block,
            to_block: state.current_block_id.clone(),
            keyword,
            via_fallback,
            phase: state.phase,
        };
        info!(
            session_id = %state.session_id,
            node_id = %state.node_id,
            from = %outcome.from_block,
            to = %outcome.to_block,
            keyword = outcome.keyword.as_deref().unwrap_or("-"),
            fallback = outcome.via_fallback,
            phase = ?outcome.phase,
            "Transition applied"
        );
        outcome
    }

    /// Drop old payload segments per the configured ceilings.
    pub fn prune(&self, state: &mut SessionState) {
        let removed = state.payload.prune(
            self.config.max_segments,
            self.config.max_payload_tokens,
            self.config.primary_window(),
        );
        if removed > 0 {
            debug!(session_id = %state.session_id, removed, remaining = state.payload.len(), "Pruned execution payload");
        }
    }

    fn execute(&self, rule: &TransitionRule, state: &mut SessionState, feedback: &str) {
        match &rule.action {
            TransitionAction::Jump { target } => {
                state.enter_block(target.clone());
            }
            TransitionAction::Call { target } => {
                let caller = state.current_block_id.clone();
                state.return_stack.push(caller);
                state.enter_block(target.clone());
            }
            TransitionAction::Return => match state.return_stack.pop() {
                Some(caller) => state.enter_block(caller),
                None => {
                    warn!(block_id = %state.current_block_id, "RETURN with empty return stack");
                    state.halt(HaltReason::ReturnWithoutCall);
                }
            },
            TransitionAction::Halt => {
                let feedback = if feedback.is_empty() {
                    DEFAULT_HALT_MESSAGE.to_string()
                } else {
                    feedback.to_string()
                };
                state.halt(HaltReason::Requested { feedback });
            }
            TransitionAction::Complete => {
                state.phase = SessionPhase::Terminal;
            }
        }
    }
}

/// REDO feedback becomes its own NOTE segment, whether the rule matched
/// explicitly or fired as the block's default fallback.
fn redo_feedback(rule: &TransitionRule, feedback: &str) -> Option<String> {
    (rule.keyword == KEYWORD_REDO && !feedback.is_empty()).then(|| feedback.to_string())
}
