use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a node (workflow phase) in a manifest.
pub type NodeId = String;

/// Identifier of a block (executable step) within a node.
pub type BlockId = String;

/// Unique session identifier. One per worktree session.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of an execution payload segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SegmentKind {
    Input,
    Output,
    Note,
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::Note => "NOTE",
        };
        f.write_str(s)
    }
}

/// One entry of the running log of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSegment {
    pub id: String,
    pub kind: SegmentKind,
    pub content: String,
    /// Block that was current when the segment was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    pub timestamp: DateTime<Utc>,
}

/// A single request to the AI invocation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkOrder {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Result of an AI invocation. `success == false` is a normal outcome, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvokeResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Status of one entry in a snapshot's step trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Active,
    Halted,
    Terminal,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepInfo {
    pub name: String,
    pub status: StepStatus,
}

/// Read-only projection of a session, emitted after every transition.
///
/// Observers must not feed this back into the engine as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanningSnapshot {
    pub session_id: SessionId,
    pub node_id: NodeId,
    pub current_block_id: BlockId,
    /// Monotonic per-session sequence number.
    pub sequence: u64,
    pub steps: Vec<StepInfo>,
    pub last_output: Option<String>,
    pub is_halted: bool,
    pub is_terminal: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Operator decision for a halted session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Resume,
    Retry,
    Abort,
}

/// Resume/retry/abort entry point, delivered once a session is halted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    pub action: ControlAction,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmented_prompt: Option<String>,
}

impl ControlRequest {
    pub fn resume(session_id: SessionId, augmented_prompt: Option<String>) -> Self {
        Self {
            action: ControlAction::Resume,
            session_id,
            augmented_prompt,
        }
    }

    pub fn retry(session_id: SessionId, augmented_prompt: Option<String>) -> Self {
        Self {
            action: ControlAction::Retry,
            session_id,
            augmented_prompt,
        }
    }

    pub fn abort(session_id: SessionId) -> Self {
        Self {
            action: ControlAction::Abort,
            session_id,
            augmented_prompt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_request_wire_format() {
        let json = r#"{"action":"resume","session_id":"s-1","augmented_prompt":"focus on null checks"}"#;
        let req: ControlRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.action, ControlAction::Resume);
        assert_eq!(req.session_id, SessionId::from_str("s-1"));
        assert_eq!(req.augmented_prompt.as_deref(), Some("focus on null checks"));

        let abort: ControlRequest =
            serde_json::from_str(r#"{"action":"abort","session_id":"s-2"}"#).unwrap();
        assert_eq!(abort, ControlRequest::abort(SessionId::from_str("s-2")));
    }

    #[test]
    fn invoke_result_constructors() {
        let ok = InvokeResult::success("PROCEED");
        assert!(ok.success);
        assert_eq!(ok.content.as_deref(), Some("PROCEED"));

        let bad = InvokeResult::failure("rate limited");
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn segment_kind_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&SegmentKind::Note).unwrap(), "\"NOTE\"");
        assert_eq!(SegmentKind::Output.to_string(), "OUTPUT");
    }
}
