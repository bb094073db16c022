use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use magnat_core::config::ModelConfig;
use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::LlmClient;
use magnat_core::types::*;

use super::presets::get_preset;

/// OpenAI-compatible chat completions client. Works with OpenAI, Ollama,
/// vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let preset = get_preset(&config.provider);
        let endpoint = match (&config.base_url, &preset) {
            (Some(url), _) => url.clone(),
            (None, Some(p)) => p.default_base_url.to_string(),
            (None, None) => {
                return Err(MagnatError::Config(format!(
                    "provider '{}' needs model.base_url",
                    config.provider
                )))
            }
        };
        if preset.as_ref().is_some_and(|p| p.needs_api_key) && config.api_key.is_none() {
            return Err(MagnatError::Config(format!(
                "provider '{}' needs model.api_key",
                config.provider
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MagnatError::LlmRequest(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request(&self, request: GenerationRequest) -> ChatRequest {
        ChatRequest {
            model: request
                .model
                .unwrap_or_else(|| self.config.model_id.clone()),
            messages: convert_messages(request.messages),
            max_tokens: self.config.max_tokens,
            temperature: (self.config.temperature > 0.0).then_some(self.config.temperature),
            stream: false,
            tools: convert_tools(&request.tools),
            response_format: request.output_schema.map(|s| ResponseFormat {
                r#type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: s.name,
                    schema: s.schema,
                    strict: true,
                },
            }),
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize, Debug)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Wire messages in dialog order.
pub(crate) fn convert_messages(messages: Vec<Message>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| match msg {
            Message::System { content } => OaiMessage {
                role: "system",
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::User { content } => OaiMessage {
                role: "user",
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            },
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let calls: Vec<OaiToolCall> = tool_calls
                    .into_iter()
                    .map(|c| OaiToolCall {
                        id: Some(c.id),
                        r#type: function_type(),
                        function: OaiFunction {
                            name: c.name,
                            arguments: c.arguments,
                        },
                    })
                    .collect();
                OaiMessage {
                    role: "assistant",
                    content: if content.is_empty() && !calls.is_empty() {
                        None
                    } else {
                        Some(content)
                    },
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => OaiMessage {
                role: "tool",
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            },
        })
        .collect()
}

/// Turn the first choice into an assistant message. With a schema, the
/// answer text must be a JSON object; its fields become metadata. An answer
/// that breaks the schema is an `LlmSchema` error, which steps never retry.
fn parse_response(body: &str, schema: Option<&str>) -> Result<Message> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| MagnatError::LlmParse(e.to_string()))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| MagnatError::LlmParse("response has no choices".to_string()))?;

    if choice.finish_reason.as_deref() == Some("length") {
        warn!("Generation stopped at max_tokens");
    }

    let content = choice.message.content.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, c)| ToolCall {
            id: c.id.unwrap_or_else(|| format!("call_{}", i)),
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();

    let mut message = Message::assistant_with_tools(content.clone(), tool_calls);
    if let Some(schema) = schema.filter(|_| !message.has_tool_calls()) {
        let fields: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(content.trim()).map_err(|e| MagnatError::LlmSchema {
                schema: schema.to_string(),
                message: format!("answer is not a JSON object: {}", e),
            })?;
        for (key, value) in fields {
            message = message.with_metadata(key, value);
        }
    }
    Ok(message)
}

impl LlmClient for OpenAiClient {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Message>> {
        Box::pin(async move {
            let schema = request.output_schema.as_ref().map(|s| s.name.clone());
            let structured = schema.is_some();
            let body = self.build_request(request);

            debug!(
                model = %body.model,
                messages = body.messages.len(),
                tools = body.tools.len(),
                structured,
                "Sending chat completion"
            );

            let mut req = self.http.post(&self.endpoint).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| MagnatError::LlmRequest(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| MagnatError::LlmRequest(e.to_string()))?;
            if !status.is_success() {
                return Err(MagnatError::LlmRequest(format!("HTTP {}: {}", status, text)));
            }

            parse_response(&text, schema.as_deref())
        })
    }
}
