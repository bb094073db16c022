use std::io::Write;
use std::path::Path;

use magnat_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "ollama"
model_id = "llama3.1"
max_tokens = 2048
temperature = 0.2

[models]
security = "llama3.2:1b"
experts = "qwen2.5:14b"

[flow]
max_steps = 32

[flow.retry]
max_attempts = 5
wait_ms = 500

[flow.tool_retry]
max_attempts = 2

[prompts]
dir = "/etc/magnat/prompts"

[messages]
refusal = "Only board games, please."

[log]
filter = "magnat=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "ollama");
    assert_eq!(config.model.model_id, "llama3.1");
    assert_eq!(config.model.max_tokens, 2048);
    assert_eq!(config.security_model(), "llama3.2:1b");
    assert_eq!(config.general_model(), "llama3.1");
    assert_eq!(config.experts_model(), "qwen2.5:14b");

    assert_eq!(config.flow.step_budget(), Some(32));
    assert_eq!(config.flow.retry.max_attempts, 5);
    assert_eq!(config.flow.retry.wait_ms, 500);
    assert_eq!(config.flow.tool_retry.max_attempts, 2);
    assert_eq!(config.flow.tool_retry.wait_ms, 2000);

    assert_eq!(
        config.prompts_dir(tmp.path()),
        Path::new("/etc/magnat/prompts")
    );
    assert_eq!(config.messages.refusal, "Only board games, please.");
    assert!(config.messages.ingest_ack.contains("{title}"));
    assert!(config.messages.ingest_failed.contains("{reason}"));
    assert_eq!(config.log.filter, "magnat=debug");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("MAGNAT_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "gpt-4o-mini"
api_key = "${MAGNAT_TEST_API_KEY}"
"#;

    let config = AppConfig::parse(toml_content).expect("parse config");
    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.api_key.as_deref(), Some("expanded-key-value"));

    std::env::remove_var("MAGNAT_TEST_API_KEY");
}

#[test]
fn test_relative_prompts_dir_follows_config_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("magnat.toml");
    std::fs::write(&path, "[model]\nmodel_id = \"m\"\n").expect("write toml");

    let config = AppConfig::load(&path).expect("load config");
    assert_eq!(config.prompts_dir(&path), dir.path().join("prompts"));
    assert_eq!(config.flow.step_budget(), Some(64));
}

#[test]
fn test_missing_config_file() {
    let err = AppConfig::load(Path::new("/nonexistent/magnat.toml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/magnat.toml"));
}

#[test]
fn test_zero_attempts_rejected() {
    let err = AppConfig::parse("[model]\nmodel_id = \"m\"\n\n[flow.retry]\nmax_attempts = 0\n")
        .unwrap_err();
    assert!(err.to_string().contains("max_attempts"));
}

#[test]
fn test_example_config_parses() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("magnat.toml");
    let config = AppConfig::load(&path).expect("load bundled config");
    let prompts = config.prompts_dir(&path);
    for name in ["security", "task_classifier", "task_splitter", "main", "expert_1"] {
        assert!(prompts.join(format!("{}.md", name)).is_file(), "missing prompt {}", name);
    }
}
