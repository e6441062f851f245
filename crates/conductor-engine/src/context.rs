//! Context assembly: the three layers sent with every AI call.
//!
//! 1. Permanent: the node's `static_memory`, verbatim, every turn.
//! 2. Secondary: the current block's `rules`, replaced wholesale on block change.
//! 3. Primary: the newest 1–2 payload segments, as short references.
//!
//! [`assemble_context`] is pure. File references (`file:<path>`) are resolved
//! by the caller beforehand and passed in as [`ResolvedFiles`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use conductor_core::config::EngineConfig;
use conductor_core::types::{BlockId, NodeId, SegmentKind};

use crate::manifest::{BlockDefinition, NodeDefinition, WorkflowManifest};
use crate::state::SessionState;

const FILE_PREFIX: &str = "file:";

/// File contents fetched from the context service, keyed by requested path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFiles {
    files: BTreeMap<String, String>,
}

impl ResolvedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

/// `file:<path>` references the permanent and secondary layers need for this turn.
pub fn file_references(node: &NodeDefinition, block: Option<&BlockDefinition>) -> Vec<String> {
    let mut refs: Vec<String> = node
        .static_memory
        .values()
        .chain(block.into_iter().flat_map(|b| b.rules.iter()))
        .filter_map(|v| v.trim().strip_prefix(FILE_PREFIX))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

/// A primary-layer entry: a short reference to a recent segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryReference {
    pub segment_id: String,
    pub kind: SegmentKind,
    pub block_id: Option<BlockId>,
    pub summary: String,
}

/// Everything the next AI call is told, in layer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub node_id: NodeId,
    pub block_id: BlockId,
    pub permanent: Vec<(String, String)>,
    pub secondary: Vec<String>,
    pub primary: Vec<PrimaryReference>,
    pub instruction: String,
    pub keywords: Vec<String>,
    /// Markers for layers that could not be filled (e.g. a missing file).
    pub warnings: Vec<String>,
}

impl ContextBundle {
    /// Flatten the bundle into prompt text. Sections appear in fixed order and
    /// empty sections are omitted.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        let permanent: Vec<String> = self
            .permanent
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("## {}\n\n{}", k, v.trim()))
            .collect();
        if !permanent.is_empty() {
            parts.push(format!("# Project Memory\n\n{}", permanent.join("\n\n")));
        }

        let rules: Vec<String> = self
            .secondary
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| format!("- {}", r.trim()))
            .collect();
        if !rules.is_empty() {
            parts.push(format!("# Rules for {}\n\n{}", self.block_id, rules.join("\n")));
        }

        if !self.primary.is_empty() {
            let recent: Vec<String> = self
                .primary
                .iter()
                .map(|p| match &p.block_id {
                    Some(block) => format!("[{} {}] {}", p.kind, block, p.summary),
                    None => format!("[{}] {}", p.kind, p.summary),
                })
                .collect();
            parts.push(format!("# Recent Context\n\n{}", recent.join("\n")));
        }

        if !self.warnings.is_empty() {
            let warnings: Vec<String> = self.warnings.iter().map(|w| format!("- {}", w)).collect();
            parts.push(format!("# Context Warnings\n\n{}", warnings.join("\n")));
        }

        let mut task = format!("# Task\n\n{}", self.instruction.trim());
        if !self.keywords.is_empty() {
            task.push_str(&format!(
                "\n\nBegin your reply with exactly one of: {}.",
                self.keywords.join(", ")
            ));
        }
        parts.push(task);

        parts.join("\n\n---\n\n")
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if max_chars == 0 || trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Resolve one layer value: literal text, or the content of a `file:` reference.
fn resolve_value(value: &str, files: &ResolvedFiles, warnings: &mut Vec<String>) -> String {
    match value.trim().strip_prefix(FILE_PREFIX) {
        Some(path) => {
            let path = path.trim();
            match files.get(path) {
                Some(content) => content.to_string(),
                None => {
                    warnings.push(format!("missing file: {}", path));
                    String::new()
                }
            }
        }
        None => value.to_string(),
    }
}

/// Build the context for the next AI call of `state`'s current block.
///
/// Identical inputs always produce an identical bundle.
pub fn assemble_context(
    manifest: &WorkflowManifest,
    state: &SessionState,
    files: &ResolvedFiles,
    config: &EngineConfig,
) -> ContextBundle {
    let mut warnings = Vec::new();

    let node = manifest.node(&state.node_id);
    if node.is_none() {
        warnings.push(format!("missing node: {}", state.node_id));
    }
    let block = node.and_then(|n| n.block(&state.current_block_id));
    if node.is_some() && block.is_none() {
        warnings.push(format!("missing block: {}", state.current_block_id));
    }

    let permanent = node
        .map(|n| {
            n.static_memory
                .iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, files, &mut warnings)))
                .collect()
        })
        .unwrap_or_default();

    let secondary = block
        .map(|b| {
            b.rules
                .iter()
                .map(|r| resolve_value(r, files, &mut warnings))
                .collect()
        })
        .unwrap_or_default();

    let primary = state
        .payload
        .trailing(config.primary_window())
        .iter()
        .map(|s| PrimaryReference {
            segment_id: s.id.clone(),
            kind: s.kind,
            block_id: s.block_id.clone(),
            summary: truncate_chars(&s.content, config.summary_chars),
        })
        .collect();

    ContextBundle {
        node_id: state.node_id.clone(),
        block_id: state.current_block_id.clone(),
        permanent,
        secondary,
        primary,
        instruction: block.map(|b| b.prompt_template.clone()).unwrap_or_default(),
        keywords: block
            .map(|b| b.transitions.iter().map(|t| t.keyword.clone()).collect())
            .unwrap_or_default(),
        warnings,
    }
}
