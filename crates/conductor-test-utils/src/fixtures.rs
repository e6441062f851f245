use std::path::PathBuf;

use tempfile::TempDir;

use conductor_core::config::AppConfig;

/// Two nodes: `plan` (single block) and `implement`, a draft / review loop
/// with a CALL into `research`.
pub const REVIEW_LOOP_TOML: &str = r#"
[nodes.plan]
entry_block = "outline"

[nodes.plan.blocks.outline]
prompt_template = "Outline the change."

[[nodes.plan.blocks.outline.transitions]]
keyword = "PROCEED"
action = { type = "complete" }

[nodes.implement]
entry_block = "draft"
context_inheritance = true

[nodes.implement.static_memory]
style = "Prefer small functions."
architecture = "file:docs/ARCHITECTURE.md"

[nodes.implement.blocks.draft]
prompt_template = "Write the change."
rules = ["Do not touch generated files."]

[[nodes.implement.blocks.draft.transitions]]
keyword = "PROCEED"
action = { type = "jump", target = "review" }

[[nodes.implement.blocks.draft.transitions]]
keyword = "SIDELINE"
action = { type = "call", target = "research" }

[[nodes.implement.blocks.draft.transitions]]
keyword = "HALT"
action = { type = "halt" }

[nodes.implement.blocks.research]
prompt_template = "Investigate the open question."
rules = ["Report findings only."]

[[nodes.implement.blocks.research.transitions]]
keyword = "PROCEED"
action = { type = "return" }

[nodes.implement.blocks.review]
prompt_template = "Review the change."
rules = ["Be strict about tests."]

[[nodes.implement.blocks.review.transitions]]
keyword = "PROCEED"
action = { type = "jump", target = "done" }

[[nodes.implement.blocks.review.transitions]]
keyword = "REDO"
action = { type = "jump", target = "draft" }

[[nodes.implement.blocks.review.transitions]]
keyword = "HALT"
action = { type = "halt" }

[nodes.implement.blocks.done]
prompt_template = "Summarize what changed."
"#;

/// Engine limits small enough to exercise pruning and the step ceiling.
pub const SMALL_CONFIG_TOML: &str = r#"
[engine]
step_ceiling = 6
max_segments = 8
primary_segments = 2
summary_chars = 80

[model]
model_id = "test-model"

[retry]
max_retries = 0
initial_backoff_ms = 1
max_backoff_ms = 1
"#;

pub fn small_config() -> AppConfig {
    toml::from_str(SMALL_CONFIG_TOML).unwrap()
}

/// Write `content` to `name` inside a fresh temp dir.
pub fn write_temp(name: &str, content: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (dir, path)
}
