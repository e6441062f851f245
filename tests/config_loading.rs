use std::io::Write;

use conductor_core::config::AppConfig;
use conductor_core::error::ConductorError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
step_ceiling = 40
max_segments = 32
max_payload_tokens = 8000
primary_segments = 1
summary_chars = 300

[model]
model_id = "claude-sonnet-4-20250514"
temperature = 0.2
max_tokens = 4096

[invoker]
command = "claude"
args = ["-p", "--output-format", "text"]
timeout_secs = 300

[[fallback_invokers]]
command = "llm"
args = ["-m", "gpt-4o-mini"]

[retry]
max_retries = 4
initial_backoff_ms = 500
max_backoff_ms = 10000

[context]
max_file_bytes = 4096

[log]
filter = "conductor=debug"
snapshot_dir = "/tmp/conductor-snapshots"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.step_ceiling, 40);
    assert_eq!(config.engine.max_segments, 32);
    assert_eq!(config.engine.primary_window(), 1);
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.max_tokens, Some(4096));

    let invoker = config.invoker.expect("invoker present");
    assert_eq!(invoker.command, "claude");
    assert_eq!(invoker.args.len(), 3);
    assert_eq!(invoker.timeout_secs, 300);
    assert_eq!(config.fallback_invokers[0].command, "llm");

    assert_eq!(config.retry.max_retries, 4);
    assert_eq!(config.context.max_file_bytes, 4096);
    assert_eq!(config.log.filter.as_deref(), Some("conductor=debug"));
    assert_eq!(
        config.log.snapshot_dir(),
        Some(std::path::PathBuf::from("/tmp/conductor-snapshots"))
    );
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CONDUCTOR_TEST_AI_COMMAND", "/opt/bin/ai");

    let toml_content = r#"
[invoker]
command = "${CONDUCTOR_TEST_AI_COMMAND}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.invoker.unwrap().command, "/opt/bin/ai");

    std::env::remove_var("CONDUCTOR_TEST_AI_COMMAND");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
model_id = "llama3.2"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.step_ceiling, 100);
    assert_eq!(config.engine.max_segments, 64);
    assert_eq!(config.engine.max_payload_tokens, 16_000);
    assert_eq!(config.engine.primary_window(), 2);
    assert_eq!(config.engine.summary_chars, 600);
    assert!(config.model.temperature.is_none());
    assert!(config.invoker.is_none());
    assert!(config.fallback_invokers.is_empty());
    assert_eq!(config.retry.max_retries, 2);
    assert!(config.log.snapshot_dir().is_none());
}

#[test]
fn test_missing_and_malformed_config() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/conductor.toml")).unwrap_err();
    assert!(matches!(err, ConductorError::ConfigNotFound(_)));

    let defaults =
        AppConfig::load_or_default(std::path::Path::new("/nonexistent/conductor.toml")).unwrap();
    assert_eq!(defaults.model.model_id, "default");

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nstep_ceiling = \"many\"\n").expect("write toml");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, ConductorError::Config(_)));
}

#[test]
fn test_zero_step_ceiling_fails_to_load() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nstep_ceiling = 0\n").expect("write toml");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, ConductorError::Config(ref msg) if msg.contains("step_ceiling")));
}
