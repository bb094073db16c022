use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured-output fields attached to an assistant answer.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument payload, passed through to the tool service untouched.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A single message in a dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: Metadata,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: text.into(),
            tool_calls: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: text.into(),
            tool_calls,
            metadata: Metadata::new(),
        }
    }

    pub fn tool_result(call: &ToolCall, result: ToolResult) -> Self {
        Self::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: result.content,
            is_error: result.is_error,
        }
    }

    /// Attach a metadata field. No-op for non-assistant messages.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let Self::Assistant { metadata, .. } = &mut self {
            metadata.insert(key.into(), value);
        }
        self
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Assistant { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    /// Metadata field as a string, if present and a JSON string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }

    /// Replace the canonical content with a metadata field.
    ///
    /// String values are copied verbatim, anything else as its JSON text.
    /// Returns `false` when the message is not an assistant answer or the
    /// field is absent.
    pub fn promote(&mut self, field: &str) -> bool {
        let Self::Assistant {
            content, metadata, ..
        } = self
        else {
            return false;
        };
        match metadata.get(field) {
            Some(serde_json::Value::String(s)) => {
                *content = s.clone();
                true
            }
            Some(other) => {
                *content = other.to_string();
                true
            }
            None => false,
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of a tool execution, already serialized for the dialog.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Serialize a structured payload as the result text.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// JSON schema the model's answer must satisfy. Parsed fields land in the
/// assistant message's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Everything the generation collaborator needs for one call.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub output_schema: Option<OutputSchema>,
    /// Per-step model override; `None` uses the configured default.
    pub model: Option<String>,
}

/// Receipt returned by a document store after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub source: String,
    pub title: Option<String>,
    pub chunks: usize,
}

/// Outcome label returned by a step's finalize phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Default,
    Tools,
    Safe,
    Unsafe,
    /// Task label produced by a classifier.
    Task(String),
}

impl Action {
    pub fn task(label: impl AsRef<str>) -> Self {
        Self::from(label.as_ref())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Tools => "tools",
            Self::Safe => "safe",
            Self::Unsafe => "unsafe",
            Self::Task(label) => label,
        }
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        match label.trim() {
            "default" => Self::Default,
            "tools" => Self::Tools,
            "safe" => Self::Safe,
            "unsafe" => Self::Unsafe,
            other => Self::Task(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Self::from(label.as_str())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification emitted by the flow runner.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A flow run started.
    RunStarted {
        run_id: String,
        flow: String,
        input: Option<String>,
        at: DateTime<Utc>,
    },
    /// A step is about to prepare.
    StepStarted {
        run_id: String,
        flow: String,
        step: String,
        at: DateTime<Utc>,
    },
    /// A step's execute phase failed and will be retried.
    StepRetried {
        run_id: String,
        step: String,
        attempt: u32,
        error: String,
    },
    /// A step finalized with an outcome label.
    StepFinished {
        run_id: String,
        flow: String,
        step: String,
        action: Action,
        elapsed_ms: u64,
    },
    /// A step failed and aborted the run.
    StepFailed {
        run_id: String,
        flow: String,
        step: String,
        error: String,
    },
    /// A flow run reached a terminal step.
    RunFinished {
        run_id: String,
        flow: String,
        terminal: String,
        action: Action,
        output: Option<String>,
        elapsed_ms: u64,
    },
}
