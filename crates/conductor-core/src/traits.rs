use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// AI invocation layer: receives a work order, returns text or a failure.
///
/// Shared between orchestrators by explicit `Arc` reference.
pub trait AiInvoker: Send + Sync + 'static {
    /// Execute one completion. Both `Err` and `InvokeResult { success: false }`
    /// are treated by the engine as a failed turn.
    fn invoke(&self, order: WorkOrder) -> BoxFuture<'_, Result<InvokeResult>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "invoker"
    }
}

/// File-context slicing service.
pub trait ContextService: Send + Sync + 'static {
    /// Return bounded content for each requested file, keyed by the path as given.
    /// Files that could not be sliced are simply absent from the map.
    fn get_file_context(
        &self,
        worktree: PathBuf,
        target_files: Vec<String>,
    ) -> BoxFuture<'_, Result<BTreeMap<String, String>>>;
}

/// One-way observer of planning snapshots.
pub trait StateObserver: Send + Sync + 'static {
    fn on_state_update(&self, snapshot: &PlanningSnapshot);
}

impl<F> StateObserver for F
where
    F: Fn(&PlanningSnapshot) + Send + Sync + 'static,
{
    fn on_state_update(&self, snapshot: &PlanningSnapshot) {
        self(snapshot)
    }
}
