pub mod context;
pub mod keyword;
pub mod manifest;
pub mod orchestrator;
pub mod payload;
pub mod pool;
pub mod registry;
pub mod run_log;
pub mod state;
pub mod transition;

pub use context::{assemble_context, file_references, ContextBundle, PrimaryReference, ResolvedFiles};
pub use keyword::{parse_keyword, KeywordParser, LeadingKeywordParser, ParsedKeyword};
pub use manifest::{
    BlockDefinition, NodeDefinition, TransitionAction, TransitionRule, ValidatedManifest,
    WorkflowManifest,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use payload::ExecutionPayload;
pub use pool::InvokerPool;
pub use registry::{SessionHandle, SessionInfo, SessionRegistry};
pub use run_log::SnapshotLogger;
pub use state::{HaltReason, ReturnStack, SessionPhase, SessionState};
pub use transition::{TransitionEngine, TransitionInput, TransitionOutcome};
