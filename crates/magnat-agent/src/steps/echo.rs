use futures::future::BoxFuture;

use magnat_core::error::Result;
use magnat_core::types::{Action, Message};
use magnat_core::ConversationState;

use crate::graph::Step;

/// Appends a fixed assistant reply to the main dialog.
pub struct EchoStep {
    name: String,
    text: String,
}

impl EchoStep {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl Step for EchoStep {
    type Input = ();
    type Output = Message;

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, _state: &ConversationState) -> Result<()> {
        Ok(())
    }

    fn execute<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move { Ok(Message::assistant(self.text.clone())) })
    }

    fn finalize(&self, state: &mut ConversationState, _input: (), reply: Message) -> Result<Action> {
        state.dialog_mut().push(reply);
        Ok(Action::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RunContext, StepRunner};
    use magnat_core::types::Role;

    #[tokio::test]
    async fn test_appends_canned_reply() {
        let step = EchoStep::new("refusal", "Sorry, rules questions only.");
        let mut state = ConversationState::seeded("Tell me a joke");

        let action = step.run(&mut state, &RunContext::new()).await.unwrap();

        assert_eq!(action, Action::Default);
        let last = state.dialog().last().unwrap();
        assert_eq!(last.role(), Role::Assistant);
        assert_eq!(last.content(), "Sorry, rules questions only.");
    }
}
