use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::info;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{ControlRequest, SessionId};

use crate::orchestrator::{Orchestrator, RunOutcome};

/// Shared handle to one session's orchestrator.
pub type SessionHandle = Arc<tokio::sync::Mutex<Orchestrator>>;

struct SessionEntry {
    handle: SessionHandle,
    started_at: DateTime<Utc>,
}

/// Summary of a registered session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
}

/// Tracks active sessions so control requests can be routed by session id.
///
/// Each orchestrator sits behind its own async mutex; sessions never share
/// state with each other.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an orchestrator under its own session id.
    pub fn register(&self, orchestrator: Orchestrator) -> SessionHandle {
        let session_id = orchestrator.session_id().clone();
        let handle = Arc::new(tokio::sync::Mutex::new(orchestrator));
        info!(session_id = %session_id, "Registered session");
        self.lock().insert(
            session_id,
            SessionEntry {
                handle: handle.clone(),
                started_at: Utc::now(),
            },
        );
        handle
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.lock().get(session_id).map(|e| e.handle.clone())
    }

    /// Route a control request to its session.
    pub async fn dispatch(&self, request: ControlRequest) -> Result<RunOutcome> {
        let handle = self.get(&request.session_id).ok_or_else(|| {
            ConductorError::InvalidControl {
                session_id: request.session_id.to_string(),
                reason: "no such session".into(),
            }
        })?;
        let mut orchestrator = handle.lock().await;
        orchestrator.handle(request).await
    }

    pub fn remove(&self, session_id: &SessionId) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Removed session");
        }
        removed
    }

    /// Active sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| SessionInfo {
                session_id: id.clone(),
                started_at: entry.started_at,
            })
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
