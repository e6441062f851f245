use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

use conductor_core::error::{ConductorError, Result};

use crate::keyword::is_valid_keyword;

use super::model::{NodeDefinition, TransitionAction, WorkflowManifest};

/// A manifest that passed structural validation.
///
/// The only way to obtain one is [`ValidatedManifest::new`], so an
/// orchestrator can never be built over a malformed graph. Cheap to clone;
/// many orchestrators may share one.
#[derive(Debug, Clone)]
pub struct ValidatedManifest {
    inner: Arc<WorkflowManifest>,
}

impl ValidatedManifest {
    /// Normalise block ids and validate the whole graph.
    pub fn new(mut manifest: WorkflowManifest) -> Result<Self> {
        if manifest.nodes.is_empty() {
            return Err(ConductorError::invalid_node("<manifest>", "manifest declares no nodes"));
        }

        for (node_id, node) in manifest.nodes.iter_mut() {
            for (key, block) in node.blocks.iter_mut() {
                if block.id.is_empty() {
                    block.id = key.clone();
                } else if block.id != *key {
                    return Err(ConductorError::invalid_block(
                        node_id,
                        key,
                        format!("block id '{}' does not match its key", block.id),
                    ));
                }
            }
            validate_node(node_id, node)?;
        }

        debug!(nodes = manifest.nodes.len(), "Manifest validated");
        Ok(Self {
            inner: Arc::new(manifest),
        })
    }
}

impl Deref for ValidatedManifest {
    type Target = WorkflowManifest;

    fn deref(&self) -> &WorkflowManifest {
        &self.inner
    }
}

fn validate_node(node_id: &str, node: &NodeDefinition) -> Result<()> {
    if node.entry_block.is_empty() {
        return Err(ConductorError::invalid_node(node_id, "node has no entry block"));
    }
    if !node.blocks.contains_key(&node.entry_block) {
        return Err(ConductorError::invalid_node(
            node_id,
            format!("entry block '{}' does not exist", node.entry_block),
        ));
    }

    for (block_id, block) in &node.blocks {
        let mut seen = HashSet::new();
        let mut fallbacks = 0;
        let mut returns = 0;

        for rule in &block.transitions {
            if rule.keyword.trim().is_empty() {
                return Err(ConductorError::invalid_block(node_id, block_id, "empty transition keyword"));
            }
            if !is_valid_keyword(&rule.keyword) {
                return Err(ConductorError::invalid_block(
                    node_id,
                    block_id,
                    format!(
                        "keyword '{}' must start with a letter and contain only letters, digits, '_' or '-'",
                        rule.keyword
                    ),
                ));
            }
            if !seen.insert(rule.keyword.as_str()) {
                return Err(ConductorError::invalid_block(
                    node_id,
                    block_id,
                    format!("keyword '{}' declared more than once", rule.keyword),
                ));
            }
            if rule.default_fallback {
                fallbacks += 1;
            }
            match &rule.action {
                TransitionAction::Jump { target } | TransitionAction::Call { target } => {
                    if !node.blocks.contains_key(target) {
                        return Err(ConductorError::invalid_block(
                            node_id,
                            block_id,
                            format!(
                                "{} target '{}' of keyword '{}' does not exist",
                                rule.action.label(),
                                target,
                                rule.keyword
                            ),
                        ));
                    }
                }
                TransitionAction::Return => returns += 1,
                TransitionAction::Halt | TransitionAction::Complete => {}
            }
        }

        if fallbacks > 1 {
            return Err(ConductorError::invalid_block(
                node_id,
                block_id,
                format!("{} rules marked default_fallback (at most one allowed)", fallbacks),
            ));
        }
        if returns > 1 {
            return Err(ConductorError::invalid_block(
                node_id,
                block_id,
                format!("{} RETURN rules declared (at most one allowed)", returns),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::model::{BlockDefinition, TransitionRule};

    fn node() -> NodeDefinition {
        NodeDefinition::new("a")
            .with_block(
                BlockDefinition::new("a", "Do A.")
                    .with_transition(TransitionRule::jump("PROCEED", "b")),
            )
            .with_block(BlockDefinition::new("b", "Do B."))
    }

    fn validate(node: NodeDefinition) -> Result<ValidatedManifest> {
        ValidatedManifest::new(WorkflowManifest::new().with_node("impl", node))
    }

    fn reason(err: ConductorError) -> (String, Option<String>, String) {
        match err {
            ConductorError::ManifestInvalid { node, block, reason } => (node, block, reason),
            other => panic!("expected ManifestInvalid, got {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_manifest() {
        let manifest = validate(node()).unwrap();
        assert_eq!(manifest.nodes.len(), 1);
        assert!(manifest.node("impl").unwrap().block("b").is_some());
    }

    #[test]
    fn rejects_empty_manifest() {
        assert!(ValidatedManifest::new(WorkflowManifest::new()).is_err());
    }

    #[test]
    fn rejects_missing_entry_block() {
        let mut n = node();
        n.entry_block = "missing".into();
        let (node_id, block, msg) = reason(validate(n).unwrap_err());
        assert_eq!(node_id, "impl");
        assert!(block.is_none());
        assert!(msg.contains("missing"));
    }

    #[test]
    fn rejects_unknown_target() {
        let n = node().with_block(
            BlockDefinition::new("c", "").with_transition(TransitionRule::call("SIDELINE", "gone")),
        );
        let (_, block, msg) = reason(validate(n).unwrap_err());
        assert_eq!(block.as_deref(), Some("c"));
        assert!(msg.contains("'gone'"));
    }

    #[test]
    fn rejects_two_fallbacks() {
        let n = node().with_block(
            BlockDefinition::new("c", "")
                .with_transition(TransitionRule::jump("PROCEED", "a").as_fallback())
                .with_transition(TransitionRule::halt("HALT").as_fallback()),
        );
        let (_, block, msg) = reason(validate(n).unwrap_err());
        assert_eq!(block.as_deref(), Some("c"));
        assert!(msg.contains("default_fallback"));
    }

    #[test]
    fn rejects_duplicate_keyword() {
        let n = node().with_block(
            BlockDefinition::new("c", "")
                .with_transition(TransitionRule::jump("PROCEED", "a"))
                .with_transition(TransitionRule::jump("PROCEED", "b")),
        );
        assert!(reason(validate(n).unwrap_err()).2.contains("more than once"));
    }

    #[test]
    fn rejects_unparseable_keywords() {
        for keyword in ["SHIP IT", "LGTM!", "2FA"] {
            let n = node().with_block(
                BlockDefinition::new("c", "").with_transition(TransitionRule::jump(keyword, "a")),
            );
            let (_, block, msg) = reason(validate(n).unwrap_err());
            assert_eq!(block.as_deref(), Some("c"));
            assert!(msg.contains(keyword), "{msg}");
        }
    }

    #[test]
    fn rejects_two_returns() {
        let n = node().with_block(
            BlockDefinition::new("c", "")
                .with_transition(TransitionRule::ret("RETURN"))
                .with_transition(TransitionRule::ret("DONE")),
        );
        assert!(reason(validate(n).unwrap_err()).2.contains("RETURN"));
    }

    #[test]
    fn fills_block_ids_from_keys() {
        let mut n = node();
        n.blocks.get_mut("b").unwrap().id = String::new();
        let manifest = validate(n).unwrap();
        assert_eq!(manifest.node("impl").unwrap().block("b").unwrap().id, "b");
    }

    #[test]
    fn rejects_mismatched_block_id() {
        let mut n = node();
        n.blocks.get_mut("b").unwrap().id = "other".into();
        assert!(reason(validate(n).unwrap_err()).2.contains("does not match"));
    }
}
