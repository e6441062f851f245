use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};

/// Top-level Conductor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub invoker: Option<InvokerConfig>,
    /// Invokers tried once each after the primary is exhausted.
    #[serde(default)]
    pub fallback_invokers: Vec<InvokerConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Limits applied by the transition engine and the context assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum transitions per drive before the session halts.
    #[serde(default = "default_step_ceiling")]
    pub step_ceiling: usize,
    /// Execution payload segment ceiling.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// Execution payload token ceiling (0 = unlimited).
    #[serde(default = "default_max_payload_tokens")]
    pub max_payload_tokens: usize,
    /// Number of trailing segments that form the primary layer (clamped to 1..=2).
    #[serde(default = "default_primary_segments")]
    pub primary_segments: usize,
    /// Per-segment character cap when rendering the primary layer.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_ceiling: default_step_ceiling(),
            max_segments: default_max_segments(),
            max_payload_tokens: default_max_payload_tokens(),
            primary_segments: default_primary_segments(),
            summary_chars: default_summary_chars(),
        }
    }
}

impl EngineConfig {
    /// Primary window size, always 1 or 2.
    pub fn primary_window(&self) -> usize {
        self.primary_segments.clamp(1, 2)
    }
}

fn default_step_ceiling() -> usize { 100 }
fn default_max_segments() -> usize { 64 }
fn default_max_payload_tokens() -> usize { 16_000 }
fn default_primary_segments() -> usize { 2 }
fn default_summary_chars() -> usize { 600 }

/// Default model parameters placed on every work order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "default".to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Shell-command AI invoker used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_invoker_timeout")]
    pub timeout_secs: u64,
}

fn default_invoker_timeout() -> u64 { 600 }

/// Retry configuration for the invoker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Filesystem context-slicing service limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> usize { 65_536 }

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Directory for JSONL snapshot logs. Disabled when unset.
    #[serde(default)]
    pub snapshot_dir: Option<String>,
}

impl LogConfig {
    /// Resolve the snapshot directory (expand ~).
    pub fn snapshot_dir(&self) -> Option<PathBuf> {
        self.snapshot_dir.as_deref().map(expand_home)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConductorError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| ConductorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the engine unable to make progress.
    pub fn validate(&self) -> Result<()> {
        if self.engine.step_ceiling == 0 {
            return Err(ConductorError::Config(
                "engine.step_ceiling must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
