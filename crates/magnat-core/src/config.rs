use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MagnatError, Result};

/// Top-level Magnat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub models: ModelOverrides,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }
fn default_request_timeout() -> u64 { 120 }

/// Per-role model ids. Unset roles use `model.model_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverrides {
    #[serde(default)]
    pub security: Option<String>,
    #[serde(default)]
    pub general: Option<String>,
    #[serde(default)]
    pub experts: Option<String>,
}

/// Flow runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Upper bound on steps per run; `0` disables the budget.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Retry policy for generation steps.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Retry policy for tool-invocation steps.
    #[serde(default = "default_tool_retry")]
    pub tool_retry: RetryConfig,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            retry: RetryConfig::default(),
            tool_retry: default_tool_retry(),
        }
    }
}

impl FlowConfig {
    pub fn step_budget(&self) -> Option<usize> {
        (self.max_steps > 0).then_some(self.max_steps)
    }
}

fn default_max_steps() -> usize { 64 }

fn default_tool_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        wait_ms: 0,
    }
}

/// Retry configuration for a step's execute phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_ms: default_wait_ms(),
        }
    }
}

impl RetryConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_wait_ms() -> u64 { 2000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Directory holding one `<name>.md` file per prompt.
    #[serde(default = "default_prompts_dir")]
    pub dir: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
        }
    }
}

fn default_prompts_dir() -> String { "prompts".to_string() }

/// Canned assistant texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_refusal")]
    pub refusal: String,
    /// `{title}` and `{chunks}` are substituted.
    #[serde(default = "default_ingest_ack")]
    pub ingest_ack: String,
    /// Reply when a document is refused. `{source}` and `{reason}` are substituted.
    #[serde(default = "default_ingest_failed")]
    pub ingest_failed: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            refusal: default_refusal(),
            ingest_ack: default_ingest_ack(),
            ingest_failed: default_ingest_failed(),
        }
    }
}

fn default_refusal() -> String {
    "Sorry, I can only help with questions about tabletop game rules.".to_string()
}

fn default_ingest_ack() -> String {
    "Added \"{title}\" to the library ({chunks} sections).".to_string()
}

fn default_ingest_failed() -> String {
    "Could not add {source} to the library: {reason}".to_string()
}

/// Runtime logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "info".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| MagnatError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| MagnatError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.flow.retry.max_attempts == 0 || self.flow.tool_retry.max_attempts == 0 {
            return Err(MagnatError::Config(
                "flow retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(MagnatError::Config("model.model_id is empty".to_string()));
        }
        Ok(())
    }

    /// Resolve the prompts directory relative to the config file.
    pub fn prompts_dir(&self, config_path: &Path) -> PathBuf {
        let dir = PathBuf::from(&self.prompts.dir);
        if dir.is_absolute() {
            return dir;
        }
        config_path
            .parent()
            .map(|p| p.join(&dir))
            .unwrap_or(dir)
    }

    pub fn security_model(&self) -> &str {
        self.models.security.as_deref().unwrap_or(&self.model.model_id)
    }

    pub fn general_model(&self) -> &str {
        self.models.general.as_deref().unwrap_or(&self.model.model_id)
    }

    pub fn experts_model(&self) -> &str {
        self.models.experts.as_deref().unwrap_or(&self.model.model_id)
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_MAGNAT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_MAGNAT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_MAGNAT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_MAGNAT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_MAGNAT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = AppConfig::parse(
            r#"
[model]
model_id = "gpt-oss:latest"
"#,
        )
        .unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.flow.max_steps, 64);
        assert_eq!(config.flow.retry.max_attempts, 3);
        assert_eq!(config.flow.tool_retry.max_attempts, 1);
        assert_eq!(config.prompts.dir, "prompts");
        assert_eq!(config.security_model(), "gpt-oss:latest");
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_role_model_overrides() {
        let config = AppConfig::parse(
            r#"
[model]
model_id = "base"

[models]
security = "guard-small"
"#,
        )
        .unwrap();
        assert_eq!(config.security_model(), "guard-small");
        assert_eq!(config.general_model(), "base");
        assert_eq!(config.experts_model(), "base");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = AppConfig::parse(
            r#"
[model]
model_id = "base"

[flow.retry]
max_attempts = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, MagnatError::Config(_)));
    }

    #[test]
    fn test_step_budget_zero_disables() {
        let mut flow = FlowConfig::default();
        assert_eq!(flow.step_budget(), Some(64));
        flow.max_steps = 0;
        assert_eq!(flow.step_budget(), None);
    }

    #[test]
    fn test_prompts_dir_relative_to_config() {
        let config = AppConfig::parse("[model]\nmodel_id = \"m\"\n").unwrap();
        let dir = config.prompts_dir(Path::new("/etc/magnat/magnat.toml"));
        assert_eq!(dir, PathBuf::from("/etc/magnat/prompts"));
    }
}
