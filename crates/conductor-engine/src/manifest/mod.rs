//! Workflow manifest: the immutable graph of nodes and blocks.
//!
//! A manifest maps node ids to [`NodeDefinition`]s. Each node owns a set of
//! [`BlockDefinition`]s and names one of them as its entry block. Blocks
//! declare [`TransitionRule`]s that map an AI-emitted keyword to a
//! JUMP / CALL / RETURN / HALT / COMPLETE action.
//!
//! Manifests are validated once, up front; see [`ValidatedManifest`].

pub mod load;
pub mod model;
pub mod validate;

pub use load::{load_manifest, parse_manifest, ManifestFormat};
pub use model::{
    BlockDefinition, NodeDefinition, TransitionAction, TransitionRule, WorkflowManifest,
    KEYWORD_HALT, KEYWORD_PROCEED, KEYWORD_REDO, KEYWORD_SIDELINE,
};
pub use validate::ValidatedManifest;
