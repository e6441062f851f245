//! Mocks and fixtures shared by the Conductor test suites.
//!
//! Depends on `conductor-core` only, so engine unit tests can use it
//! without pulling in a second copy of the engine.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::{AiInvoker, ContextService, StateObserver};
use conductor_core::types::{InvokeResult, PlanningSnapshot, WorkOrder};

pub mod fixtures;

/// Invoker that replays a fixed script of responses.
///
/// Once the script runs out every call reports a failure.
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<InvokeResult>>>,
    orders: Mutex<Vec<WorkOrder>>,
}

impl ScriptedInvoker {
    /// Each entry becomes a successful response with that text.
    pub fn new(responses: &[&str]) -> Self {
        Self::from_results(
            responses
                .iter()
                .map(|r| Ok(InvokeResult::success(*r)))
                .collect(),
        )
    }

    pub fn from_results(results: Vec<Result<InvokeResult>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            orders: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response.
    pub fn push(&self, response: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(InvokeResult::success(response)));
    }

    pub fn calls(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Work orders received so far, oldest first.
    pub fn orders(&self) -> Vec<WorkOrder> {
        self.orders.lock().unwrap().clone()
    }

    /// Prompt of the most recent work order.
    pub fn last_prompt(&self) -> Option<String> {
        self.orders.lock().unwrap().last().map(|o| o.prompt.clone())
    }
}

impl AiInvoker for ScriptedInvoker {
    fn invoke(&self, order: WorkOrder) -> BoxFuture<'_, Result<InvokeResult>> {
        self.orders.lock().unwrap().push(order);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(InvokeResult::failure("script exhausted")));
        Box::pin(async move { next })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Context service backed by an in-memory file map.
#[derive(Default)]
pub struct MemoryContextService {
    files: BTreeMap<String, String>,
    fail_with: Option<String>,
    requests: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl MemoryContextService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    /// Make every request fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Requests received so far as `(worktree, files)`.
    pub fn requests(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl ContextService for MemoryContextService {
    fn get_file_context(
        &self,
        worktree: PathBuf,
        target_files: Vec<String>,
    ) -> BoxFuture<'_, Result<BTreeMap<String, String>>> {
        self.requests
            .lock()
            .unwrap()
            .push((worktree, target_files.clone()));
        Box::pin(async move {
            if let Some(message) = &self.fail_with {
                return Err(ConductorError::ContextService(message.clone()));
            }
            Ok(target_files
                .into_iter()
                .filter_map(|f| self.files.get(&f).map(|c| (f, c.clone())))
                .collect())
        })
    }
}

/// Observer that keeps every snapshot it sees.
#[derive(Default)]
pub struct RecordingObserver {
    snapshots: Mutex<Vec<PlanningSnapshot>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<PlanningSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<PlanningSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

impl StateObserver for RecordingObserver {
    fn on_state_update(&self, snapshot: &PlanningSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}
