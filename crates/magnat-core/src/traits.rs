use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Generation collaborator: ordered messages in, one assistant message out.
pub trait LlmClient: Send + Sync + 'static {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Message>>;
}

/// A single in-process tool.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with parsed input.
    fn execute(&self, input: serde_json::Value) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Tool-service collaborator: the catalog the tool step dispatches into.
pub trait ToolService: Send + Sync + 'static {
    /// Definitions advertised to the generation collaborator.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool by name with its raw argument payload.
    fn call<'a>(&'a self, name: &'a str, arguments: &'a str) -> BoxFuture<'a, Result<ToolResult>>;
}

/// Prompt lookup. Prompts may change externally, so callers fetch on every
/// invocation and never cache.
pub trait PromptProvider: Send + Sync + 'static {
    fn prompt<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Document ingestion backend used by the "adding" branch.
pub trait DocumentStore: Send + Sync + 'static {
    /// Ingest a source (URL or inline markdown).
    fn ingest<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<IngestReceipt>>;
}

/// Observability sink for flow lifecycle events. Never load-bearing.
pub trait Tracer: Send + Sync + 'static {
    fn record(&self, event: FlowEvent);
}

/// Tracer that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn record(&self, _event: FlowEvent) {}
}
