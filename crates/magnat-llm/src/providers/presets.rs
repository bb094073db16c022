/// Endpoint defaults for OpenAI-compatible providers.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "openai" => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            needs_api_key: true,
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
        }),
        "vllm" => Some(ProviderPreset {
            default_base_url: "http://localhost:8000/v1/chat/completions",
            needs_api_key: false,
        }),
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
        }),
        _ => None,
    }
}

pub fn all_preset_names() -> &'static [&'static str] {
    &["openai", "ollama", "vllm", "groq", "openrouter"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_preset_resolves() {
        for name in all_preset_names() {
            let preset = get_preset(name).unwrap();
            assert!(preset.default_base_url.ends_with("/chat/completions"));
        }
        assert!(get_preset("anthropic").is_none());
    }
}
