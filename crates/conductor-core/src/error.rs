use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    // Manifest errors
    #[error("Manifest invalid: node '{node}'{}: {reason}", block.as_ref().map(|b| format!(", block '{}'", b)).unwrap_or_default())]
    ManifestInvalid {
        node: String,
        block: Option<String>,
        reason: String,
    },

    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    #[error("Manifest file not found: {0}")]
    ManifestNotFound(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // Collaborator errors
    #[error("AI invocation failed: {0}")]
    Invoker(String),

    #[error("Invoker timeout after {timeout_secs}s: {command}")]
    InvokerTimeout { command: String, timeout_secs: u64 },

    #[error("Context service error: {0}")]
    ContextService(String),

    // Session control errors
    #[error("Invalid control request for session {session_id}: {reason}")]
    InvalidControl { session_id: String, reason: String },

    #[error("Session {0} is still running")]
    SessionBusy(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConductorError {
    /// Shorthand for a manifest error scoped to a node.
    pub fn invalid_node(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            node: node.into(),
            block: None,
            reason: reason.into(),
        }
    }

    /// Shorthand for a manifest error scoped to a block within a node.
    pub fn invalid_block(
        node: impl Into<String>,
        block: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ManifestInvalid {
            node: node.into(),
            block: Some(block.into()),
            reason: reason.into(),
        }
    }

    /// Whether this error is a structural manifest problem (fatal at construction).
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            Self::ManifestInvalid { .. } | Self::ManifestParse(_) | Self::ManifestNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
