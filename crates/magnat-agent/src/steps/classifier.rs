use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;

use magnat_core::error::{MagnatError, Result};
use magnat_core::types::{Action, Message, OutputSchema};
use magnat_core::{ConversationState, Dialog};

use super::generation::Generation;
use crate::graph::{RetryPolicy, Step};

/// Metadata field holding the classification label.
pub const TASK_FIELD: &str = "task";
/// Metadata field promoted into the answer's content.
pub const CONTENT_FIELD: &str = "content";

/// Branching generation step. The model answers with `{task, content}`;
/// `content` becomes the message text and `task` becomes the outcome label.
pub struct ClassifierStep {
    name: String,
    tasks: Vec<String>,
    generation: Generation,
    retry: RetryPolicy,
}

impl ClassifierStep {
    /// `tasks` is the closed set of labels the model may choose from.
    pub fn new<I, T>(name: impl Into<String>, generation: Generation, tasks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tasks: Vec<String> = tasks.into_iter().map(Into::into).collect();
        let generation = generation.with_output_schema(task_schema(&tasks));
        Self {
            name: name.into(),
            tasks,
            generation,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    fn violation(&self, message: impl Into<String>) -> MagnatError {
        MagnatError::ContractViolation {
            step: self.name.clone(),
            message: message.into(),
        }
    }
}

fn task_schema(tasks: &[String]) -> OutputSchema {
    OutputSchema {
        name: "task_classification".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "enum": tasks,
                    "description": "Kind of request the user made"
                },
                "content": {
                    "type": "string",
                    "description": "Short rationale for the chosen task"
                }
            },
            "required": ["task", "content"],
            "additionalProperties": false
        }),
    }
}

impl Step for ClassifierStep {
    type Input = Dialog;
    type Output = Message;

    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn prepare(&self, state: &ConversationState) -> Result<Dialog> {
        Ok(state.dialog().clone())
    }

    fn execute<'a>(&'a self, dialog: &'a Dialog) -> BoxFuture<'a, Result<Message>> {
        Box::pin(self.generation.generate(dialog))
    }

    fn finalize(
        &self,
        state: &mut ConversationState,
        _input: Dialog,
        mut answer: Message,
    ) -> Result<Action> {
        let task = answer
            .metadata_str(TASK_FIELD)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| self.violation("answer has no string 'task' field"))?;

        if !self.tasks.is_empty() && !self.tasks.iter().any(|t| *t == task) {
            return Err(self.violation(format!(
                "task '{}' is not one of [{}]",
                task,
                self.tasks.join(", ")
            )));
        }
        if !answer.promote(CONTENT_FIELD) {
            return Err(self.violation("answer has no 'content' field"));
        }

        info!(step = %self.name, %task, "Request classified");
        state.dialog_mut().push(answer);
        Ok(Action::task(task))
    }
}
