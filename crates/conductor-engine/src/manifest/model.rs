use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use conductor_core::types::{BlockId, NodeId};

/// Well-known keywords. Any other token may be declared as a custom keyword.
pub const KEYWORD_PROCEED: &str = "PROCEED";
pub const KEYWORD_REDO: &str = "REDO";
pub const KEYWORD_SIDELINE: &str = "SIDELINE";
pub const KEYWORD_HALT: &str = "HALT";

/// The whole workflow graph, keyed by node id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowManifest {
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeDefinition>,
}

impl WorkflowManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node.
    pub fn with_node(mut self, id: impl Into<NodeId>, node: NodeDefinition) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }
}

/// A named phase of a workflow: an entry block plus the blocks it may reach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDefinition {
    pub entry_block: BlockId,
    /// Seed the primary layer from the parent node's trailing segments.
    #[serde(default)]
    pub context_inheritance: bool,
    /// Project-level constants, included verbatim every turn.
    #[serde(default)]
    pub static_memory: BTreeMap<String, String>,
    #[serde(default)]
    pub blocks: BTreeMap<BlockId, BlockDefinition>,
}

impl NodeDefinition {
    /// Create a node with the given entry block and no blocks yet.
    pub fn new(entry_block: impl Into<BlockId>) -> Self {
        Self {
            entry_block: entry_block.into(),
            context_inheritance: false,
            static_memory: BTreeMap::new(),
            blocks: BTreeMap::new(),
        }
    }

    /// Add a block. The block's id is used as its key.
    pub fn with_block(mut self, block: BlockDefinition) -> Self {
        self.blocks.insert(block.id.clone(), block);
        self
    }

    /// Add a static memory entry.
    pub fn with_memory(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_memory.insert(key.into(), value.into());
        self
    }

    /// Set context inheritance.
    pub fn with_inheritance(mut self, inherit: bool) -> Self {
        self.context_inheritance = inherit;
        self
    }

    pub fn block(&self, id: &str) -> Option<&BlockDefinition> {
        self.blocks.get(id)
    }
}

/// One executable step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockDefinition {
    /// Filled from the map key when loading from a file.
    #[serde(default)]
    pub id: BlockId,
    #[serde(default)]
    pub prompt_template: String,
    /// Secondary context, active only while this block is current.
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionRule>,
    /// Model override for work orders issued from this block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Explicit terminal marker.
    #[serde(default)]
    pub terminal: bool,
}

impl BlockDefinition {
    pub fn new(id: impl Into<BlockId>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_template: prompt_template.into(),
            rules: vec![],
            transitions: vec![],
            model: None,
            terminal: false,
        }
    }

    /// Add a secondary-context rule.
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    /// Add a transition rule.
    pub fn with_transition(mut self, rule: TransitionRule) -> Self {
        self.transitions.push(rule);
        self
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Mark as terminal.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// A block ends the node when marked terminal or when it declares no transitions.
    pub fn is_terminal(&self) -> bool {
        self.terminal || self.transitions.is_empty()
    }

    /// Find the rule declared for `keyword` (exact, case-sensitive).
    pub fn rule_for(&self, keyword: &str) -> Option<&TransitionRule> {
        self.transitions.iter().find(|r| r.keyword == keyword)
    }

    /// The rule that fires on unmatched output, if any.
    pub fn default_fallback(&self) -> Option<&TransitionRule> {
        self.transitions.iter().find(|r| r.default_fallback)
    }
}

/// Maps an AI-emitted keyword to a state-machine action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRule {
    pub keyword: String,
    pub action: TransitionAction,
    #[serde(default)]
    pub default_fallback: bool,
}

impl TransitionRule {
    pub fn new(keyword: impl Into<String>, action: TransitionAction) -> Self {
        Self {
            keyword: keyword.into(),
            action,
            default_fallback: false,
        }
    }

    pub fn jump(keyword: impl Into<String>, target: impl Into<BlockId>) -> Self {
        Self::new(keyword, TransitionAction::Jump { target: target.into() })
    }

    pub fn call(keyword: impl Into<String>, target: impl Into<BlockId>) -> Self {
        Self::new(keyword, TransitionAction::Call { target: target.into() })
    }

    pub fn ret(keyword: impl Into<String>) -> Self {
        Self::new(keyword, TransitionAction::Return)
    }

    pub fn halt(keyword: impl Into<String>) -> Self {
        Self::new(keyword, TransitionAction::Halt)
    }

    pub fn complete(keyword: impl Into<String>) -> Self {
        Self::new(keyword, TransitionAction::Complete)
    }

    /// Mark this rule as the block's default fallback.
    pub fn as_fallback(mut self) -> Self {
        self.default_fallback = true;
        self
    }
}

/// State-machine action of a transition rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionAction {
    /// Move to `target`; the return stack is untouched.
    Jump { target: BlockId },
    /// Push the current block, then move to `target`.
    Call { target: BlockId },
    /// Pop the return stack into the current block.
    Return,
    /// Suspend for operator input.
    Halt,
    /// Finish the node.
    Complete,
}

impl TransitionAction {
    /// Target block for JUMP/CALL.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Jump { target } | Self::Call { target } => Some(target),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Jump { .. } => "jump",
            Self::Call { .. } => "call",
            Self::Return => "return",
            Self::Halt => "halt",
            Self::Complete => "complete",
        }
    }
}
