use chrono::Utc;
use serde::{Deserialize, Serialize};

use conductor_core::types::{
    BlockId, NodeId, PlanningSnapshot, SessionId, StepInfo, StepStatus,
};

use crate::payload::ExecutionPayload;

/// Blocks awaiting a RETURN, innermost last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStack {
    frames: Vec<BlockId>,
}

impl ReturnStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: BlockId) {
        self.frames.push(block);
    }

    pub fn pop(&mut self) -> Option<BlockId> {
        self.frames.pop()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[BlockId] {
        &self.frames
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Running,
    Halted,
    Terminal,
    Aborted,
}

impl SessionPhase {
    /// No further transitions will happen.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminal | Self::Aborted)
    }
}

/// Why a session halted. Always renders to a message fit for direct display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// RETURN with an empty return stack.
    ReturnWithoutCall,
    /// Output matched no declared keyword and the block has no fallback.
    UnrecognizedOutput { output: String },
    /// The AI invoker failed and the block has no fallback.
    InvocationFailed { error: String },
    /// The context service failed and the block has no fallback.
    ContextUnavailable { error: String },
    /// The workflow issued HALT.
    Requested { feedback: String },
    /// Too many transitions in one drive.
    StepCeiling { limit: usize },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReturnWithoutCall => {
                write!(f, "return-without-call: RETURN issued with an empty return stack")
            }
            Self::UnrecognizedOutput { output } => write!(
                f,
                "unrecognized output, no default fallback defined: {}",
                preview(output, 120)
            ),
            Self::InvocationFailed { error } => write!(f, "AI invocation failed: {}", error),
            Self::ContextUnavailable { error } => write!(f, "file context unavailable: {}", error),
            Self::Requested { feedback } => f.write_str(feedback),
            Self::StepCeiling { limit } => {
                write!(f, "step ceiling of {} transitions reached", limit)
            }
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

/// The mutable core of one worktree session.
///
/// Owned exclusively by one orchestrator; never shared between flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub node_id: NodeId,
    pub current_block_id: BlockId,
    pub payload: ExecutionPayload,
    pub return_stack: ReturnStack,
    pub phase: SessionPhase,
    pub halt_reason: Option<HaltReason>,
    /// Blocks entered, in order. The last entry is the current block.
    trail: Vec<BlockId>,
    snapshots_emitted: u64,
}

impl SessionState {
    pub fn new(
        session_id: SessionId,
        node_id: impl Into<NodeId>,
        entry_block: impl Into<BlockId>,
        payload: ExecutionPayload,
    ) -> Self {
        let entry_block = entry_block.into();
        Self {
            session_id,
            node_id: node_id.into(),
            current_block_id: entry_block.clone(),
            payload,
            return_stack: ReturnStack::new(),
            phase: SessionPhase::Running,
            halt_reason: None,
            trail: vec![entry_block],
            snapshots_emitted: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.phase == SessionPhase::Halted
    }

    /// Make `block` the current block.
    pub fn enter_block(&mut self, block: BlockId) {
        self.trail.push(block.clone());
        self.current_block_id = block;
    }

    pub fn halt(&mut self, reason: HaltReason) {
        self.phase = SessionPhase::Halted;
        self.halt_reason = Some(reason);
    }

    /// Clear the halt flag and reason.
    pub fn clear_halt(&mut self) {
        self.phase = SessionPhase::Running;
        self.halt_reason = None;
    }

    pub fn trail(&self) -> &[BlockId] {
        &self.trail
    }

    /// Project the session into a snapshot, advancing the snapshot sequence.
    pub fn next_snapshot(&mut self) -> PlanningSnapshot {
        self.snapshots_emitted += 1;

        let last_idx = self.trail.len().saturating_sub(1);
        let current_status = match self.phase {
            SessionPhase::Running => StepStatus::Active,
            SessionPhase::Halted => StepStatus::Halted,
            SessionPhase::Terminal => StepStatus::Terminal,
            SessionPhase::Aborted => StepStatus::Aborted,
        };
        let steps = self
            .trail
            .iter()
            .enumerate()
            .map(|(i, name)| StepInfo {
                name: name.clone(),
                status: if i == last_idx {
                    current_status
                } else {
                    StepStatus::Completed
                },
            })
            .collect();

        PlanningSnapshot {
            session_id: self.session_id.clone(),
            node_id: self.node_id.clone(),
            current_block_id: self.current_block_id.clone(),
            sequence: self.snapshots_emitted,
            steps,
            last_output: self.payload.last_output().map(|s| s.content.clone()),
            is_halted: self.is_halted(),
            is_terminal: self.phase.is_finished(),
            error_message: self.halt_reason.as_ref().map(|r| r.to_string()),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::types::SegmentKind;

    fn state() -> SessionState {
        SessionState::new(SessionId::from_str("s-1"), "impl", "draft", ExecutionPayload::new())
    }

    #[test]
    fn return_stack_is_lifo() {
        let mut stack = ReturnStack::new();
        stack.push("a".into());
        stack.push("b".into());
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop().as_deref(), Some("b"));
        assert_eq!(stack.pop().as_deref(), Some("a"));
        assert!(stack.pop().is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn halt_reason_messages() {
        assert!(HaltReason::ReturnWithoutCall.to_string().starts_with("return-without-call"));
        let msg = HaltReason::UnrecognizedOutput { output: "LGTM".into() }.to_string();
        assert!(msg.contains("unrecognized output"));
        assert!(msg.ends_with("LGTM"));
        assert_eq!(
            HaltReason::StepCeiling { limit: 5 }.to_string(),
            "step ceiling of 5 transitions reached"
        );
        let long = HaltReason::UnrecognizedOutput { output: "x".repeat(500) }.to_string();
        assert!(long.ends_with('…'));
    }

    #[test]
    fn snapshot_reflects_trail_and_phase() {
        let mut s = state();
        s.payload.push(SegmentKind::Output, "PROCEED", Some("draft"));
        s.enter_block("review".into());
        s.halt(HaltReason::Requested { feedback: "need a human".into() });

        let snap = s.next_snapshot();
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.current_block_id, "review");
        assert_eq!(snap.steps.len(), 2);
        assert_eq!(snap.steps[0].status, StepStatus::Completed);
        assert_eq!(snap.steps[1].status, StepStatus::Halted);
        assert!(snap.is_halted);
        assert_eq!(snap.error_message.as_deref(), Some("need a human"));
        assert_eq!(snap.last_output.as_deref(), Some("PROCEED"));

        s.clear_halt();
        let snap = s.next_snapshot();
        assert_eq!(snap.sequence, 2);
        assert!(!snap.is_halted);
        assert!(snap.error_message.is_none());
        assert_eq!(snap.steps[1].status, StepStatus::Active);
    }

    #[test]
    fn finished_phases() {
        assert!(SessionPhase::Terminal.is_finished());
        assert!(SessionPhase::Aborted.is_finished());
        assert!(!SessionPhase::Halted.is_finished());
    }
}
