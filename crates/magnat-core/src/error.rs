use thiserror::Error;

#[derive(Debug, Error)]
pub enum MagnatError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM answer does not match schema '{schema}': {message}")]
    LlmSchema { schema: String, message: String },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Prompt / document collaborators
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Document store error: {0}")]
    DocumentStore(String),

    #[error("Document rejected: {0}")]
    DocumentRejected(String),

    // Engine errors
    #[error("Step '{step}' exhausted {attempts} attempt(s): {source}")]
    StepExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<MagnatError>,
    },

    #[error("Contract violation in step '{step}': {message}")]
    ContractViolation { step: String, message: String },

    #[error("Flow exceeded step budget ({0})")]
    StepBudgetExceeded(usize),

    #[error("Sub-flow '{flow}' failed at step '{step}': {source}")]
    SubFlow {
        flow: String,
        step: String,
        #[source]
        source: Box<MagnatError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MagnatError {
    /// Whether a step should re-invoke `execute` after this error.
    ///
    /// Structural failures (bad collaborator output, bad wiring, cancellation)
    /// never get better on a second attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ContractViolation { .. }
            | Self::Config(_)
            | Self::ConfigNotFound(_)
            | Self::Cancelled
            | Self::StepBudgetExceeded(_)
            | Self::StepExhausted { .. }
            | Self::SubFlow { .. }
            | Self::ToolNotFound(_)
            | Self::ToolValidation(_)
            | Self::PromptNotFound(_)
            | Self::LlmSchema { .. }
            | Self::DocumentRejected(_) => false,
            Self::LlmRequest(_)
            | Self::LlmParse(_)
            | Self::ToolExecution { .. }
            | Self::ToolTimeout { .. }
            | Self::DocumentStore(_)
            | Self::Io(_)
            | Self::Json(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, MagnatError>;
