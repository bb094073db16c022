use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use magnat_core::error::{MagnatError, Result};
use magnat_core::traits::{LlmClient, PromptProvider, ToolService};
use magnat_core::types::{Action, GenerationRequest, Message, OutputSchema, Role};
use magnat_core::{ConversationState, Dialog, MAIN_CHANNEL};

use crate::graph::{RetryPolicy, Step};

/// Shared plumbing of every model-backed step: fetch the named prompt,
/// prepend it to a dialog, and ask the generation collaborator for one
/// assistant answer.
#[derive(Clone)]
pub struct Generation {
    prompt: String,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<dyn PromptProvider>,
    tools: Option<Arc<dyn ToolService>>,
    model: Option<String>,
    output_schema: Option<OutputSchema>,
}

impl Generation {
    pub fn new(
        prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<dyn PromptProvider>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            llm,
            prompts,
            tools: None,
            model: None,
            output_schema: None,
        }
    }

    /// Advertise the service's tools on every call.
    pub fn with_tools(mut self, tools: Arc<dyn ToolService>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt
    }

    /// One generation call over `dialog`. The prompt is looked up fresh on
    /// every call.
    pub async fn generate(&self, dialog: &Dialog) -> Result<Message> {
        let instruction = self.prompts.prompt(&self.prompt).await?;
        let messages = Dialog::with_instruction(Message::system(instruction), dialog).into_messages();
        let tools = self
            .tools
            .as_ref()
            .map(|t| t.definitions())
            .unwrap_or_default();

        debug!(
            prompt = %self.prompt,
            messages = messages.len(),
            tools = tools.len(),
            structured = self.output_schema.is_some(),
            "Calling generation collaborator"
        );

        let answer = self
            .llm
            .generate(GenerationRequest {
                messages,
                tools,
                output_schema: self.output_schema.clone(),
                model: self.model.clone(),
            })
            .await?;

        if answer.role() != Role::Assistant {
            return Err(MagnatError::LlmParse(format!(
                "expected an assistant message, got {}",
                answer.role()
            )));
        }
        Ok(answer)
    }
}

/// Plain generation step: answer is appended to its channel, `tools` when
/// the answer requests tool calls, `default` otherwise.
pub struct GenerationStep {
    name: String,
    channel: String,
    generation: Generation,
    retry: RetryPolicy,
}

impl GenerationStep {
    pub fn new(name: impl Into<String>, generation: Generation) -> Self {
        Self {
            name: name.into(),
            channel: MAIN_CHANNEL.to_string(),
            generation,
            retry: RetryPolicy::default(),
        }
    }

    /// Read from and append to `channel` instead of the main dialog.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Step for GenerationStep {
    type Input = Dialog;
    type Output = Message;

    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn prepare(&self, state: &ConversationState) -> Result<Dialog> {
        Ok(state.channel(&self.channel).cloned().unwrap_or_default())
    }

    fn execute<'a>(&'a self, dialog: &'a Dialog) -> BoxFuture<'a, Result<Message>> {
        Box::pin(self.generation.generate(dialog))
    }

    fn finalize(
        &self,
        state: &mut ConversationState,
        _input: Dialog,
        answer: Message,
    ) -> Result<Action> {
        let action = if answer.has_tool_calls() {
            Action::Tools
        } else {
            Action::Default
        };
        state.channel_mut(&self.channel).push(answer);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnat_core::types::ToolCall;
    use magnat_test_utils::{ScriptedLlm, StaticPrompts};

    use crate::graph::{RunContext, StepRunner};

    fn generation(llm: &Arc<ScriptedLlm>) -> Generation {
        Generation::new(
            "main",
            llm.clone(),
            Arc::new(StaticPrompts::new().with("main", "You are a rules expert.")),
        )
    }

    #[tokio::test]
    async fn test_plain_answer_returns_default() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(Message::assistant("Hi there"))]));
        let step = GenerationStep::new("assistant", generation(&llm));
        let mut state = ConversationState::seeded("Hello");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();

        assert_eq!(action, Action::Default);
        assert_eq!(state.dialog().len(), 2);
        assert_eq!(state.dialog().last().unwrap().content(), "Hi there");
    }

    #[tokio::test]
    async fn test_tool_calls_return_tools() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(Message::assistant_with_tools(
            "",
            vec![ToolCall::new("c1", "sum", r#"{"a":2,"b":3}"#)],
        ))]));
        let step = GenerationStep::new("assistant", generation(&llm));
        let mut state = ConversationState::seeded("2+3?");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();
        assert_eq!(action, Action::Tools);
    }

    #[tokio::test]
    async fn test_instruction_prepended_and_not_stored() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(Message::assistant("ok"))]));
        let step = GenerationStep::new("assistant", generation(&llm).with_model("small"));
        let mut state = ConversationState::seeded("Hello");

        step.run(&mut state, &RunContext::new()).await.unwrap();

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        let sent = &requests[0].messages;
        assert_eq!(sent[0], Message::system("You are a rules expert."));
        assert_eq!(sent[1], Message::user("Hello"));
        assert_eq!(requests[0].model.as_deref(), Some("small"));
        // The dialog holds the conversation only.
        assert_eq!(state.dialog().messages()[0].role(), Role::User);
    }

    #[tokio::test]
    async fn test_channel_scoped_generation() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(Message::assistant("plan"))]));
        let step = GenerationStep::new("splitter", generation(&llm)).on_channel("expert_1");
        let mut state = ConversationState::seeded("main question");
        state.channel_mut("expert_1").push(Message::user("sub question"));

        step.run(&mut state, &RunContext::new()).await.unwrap();

        assert_eq!(llm.requests()[0].messages[1].content(), "sub question");
        assert_eq!(state.dialog().len(), 1);
        assert_eq!(state.channel("expert_1").map(|d| d.len()), Some(2));
    }

    #[tokio::test]
    async fn test_missing_prompt_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let generation = Generation::new("nope", llm.clone(), Arc::new(StaticPrompts::new()));
        let step = GenerationStep::new("assistant", generation)
            .with_retry(RetryPolicy::new(5, std::time::Duration::ZERO));
        let mut state = ConversationState::seeded("Hello");

        let err = step.run(&mut state, &RunContext::new()).await.unwrap_err();
        assert!(matches!(err, MagnatError::PromptNotFound(_)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_fetched_on_every_run() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(Message::assistant("first")),
            Ok(Message::assistant("second")),
        ]));
        let prompts = Arc::new(StaticPrompts::new().with("main", "Version one."));
        let step = GenerationStep::new(
            "assistant",
            Generation::new("main", llm.clone(), prompts.clone()),
        );
        let mut state = ConversationState::seeded("Hello");

        step.run(&mut state, &RunContext::new()).await.unwrap();
        prompts.set("main", "Version two.");
        state.dialog_mut().push(Message::user("Again"));
        step.run(&mut state, &RunContext::new()).await.unwrap();

        let requests = llm.requests();
        assert_eq!(requests[0].messages[0], Message::system("Version one."));
        assert_eq!(requests[1].messages[0], Message::system("Version two."));
        assert_eq!(prompts.lookups(), 2);
    }
}
