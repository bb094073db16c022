use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use magnat_core::error::{MagnatError, Result};
use magnat_core::types::{Action, Message, OutputSchema};
use magnat_core::{ConversationState, Dialog};

use super::generation::Generation;
use crate::graph::{RetryPolicy, Step};

/// Channel that keeps every guardrail verdict of a run.
pub const AUDIT_CHANNEL: &str = "guardrail";

/// Safety gate. Labels the latest input `safe` or `unsafe`; any other verdict
/// fails the run instead of letting the input through.
pub struct GuardrailStep {
    name: String,
    generation: Generation,
    retry: RetryPolicy,
}

impl GuardrailStep {
    pub fn new(name: impl Into<String>, generation: Generation) -> Self {
        Self {
            name: name.into(),
            generation: generation.with_output_schema(verdict_schema()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn verdict_schema() -> OutputSchema {
    OutputSchema {
        name: "safety_verdict".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "verdict": { "type": "string", "enum": ["safe", "unsafe"] },
                "reason": { "type": "string" }
            },
            "required": ["verdict", "reason"],
            "additionalProperties": false
        }),
    }
}

impl Step for GuardrailStep {
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
        let action = match answer.metadata_str("verdict").map(str::trim) {
            Some("safe") => Action::Safe,
            Some("unsafe") => Action::Unsafe,
            other => {
                return Err(MagnatError::ContractViolation {
                    step: self.name.clone(),
                    message: format!("unrecognized verdict {:?}", other),
                })
            }
        };

        answer.promote("reason");
        match action {
            Action::Unsafe => warn!(step = %self.name, reason = answer.content(), "Input rejected"),
            _ => info!(step = %self.name, "Input accepted"),
        }
        state.channel_mut(AUDIT_CHANNEL).push(answer);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use magnat_test_utils::{verdict, ScriptedLlm, StaticPrompts};

    use crate::graph::{RunContext, StepRunner};

    fn guardrail(llm: &Arc<ScriptedLlm>) -> GuardrailStep {
        let generation = Generation::new(
            "security",
            llm.clone(),
            Arc::new(StaticPrompts::new().with("security", "Only tabletop games.")),
        );
        GuardrailStep::new("security", generation)
    }

    #[tokio::test]
    async fn test_unsafe_verdict_recorded_on_audit_channel() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(verdict("unsafe", "off topic"))]));
        let step = guardrail(&llm);
        let mut state = ConversationState::seeded("How do I pick a lock?");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();

        assert_eq!(action, Action::Unsafe);
        assert_eq!(state.dialog().len(), 1);
        let audit = state.channel(AUDIT_CHANNEL).unwrap();
        assert_eq!(audit.last().unwrap().content(), "off topic");
    }

    #[tokio::test]
    async fn test_safe_verdict() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(verdict("safe", "rules question"))]));
        let step = guardrail(&llm);
        let mut state = ConversationState::seeded("How does castling work?");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();
        assert_eq!(action, Action::Safe);
    }

    #[tokio::test]
    async fn test_unknown_verdict_fails_closed() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(verdict("maybe", "unsure"))]));
        let step = guardrail(&llm);
        let mut state = ConversationState::seeded("Hmm");

        let err = step.run(&mut state, &RunContext::new()).await.unwrap_err();
        assert!(matches!(err, MagnatError::ContractViolation { .. }));
        assert!(state.channel(AUDIT_CHANNEL).is_none());
    }

    #[tokio::test]
    async fn test_missing_verdict_fails_closed() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(Message::assistant("safe"))]));
        let step = guardrail(&llm);
        let mut state = ConversationState::seeded("Hello");

        assert!(step.run(&mut state, &RunContext::new()).await.is_err());
    }
}
