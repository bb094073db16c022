pub mod providers;

use std::sync::Arc;

use magnat_core::config::ModelConfig;
use magnat_core::error::Result;
use magnat_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use providers::presets::{all_preset_names, get_preset};

/// Create an LLM client for the configured provider.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    // Every supported provider speaks the OpenAI chat completions API
    Ok(Arc::new(OpenAiClient::new(config.clone())?))
}
