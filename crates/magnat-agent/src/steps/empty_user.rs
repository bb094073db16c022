use futures::future::BoxFuture;

use magnat_core::error::Result;
use magnat_core::types::{Action, Message};
use magnat_core::{ConversationState, MAIN_CHANNEL};

use crate::graph::Step;

/// Appends an empty user turn, for models that refuse to answer right after
/// an assistant message.
pub struct EmptyUserStep {
    name: String,
    channel: String,
}

impl EmptyUserStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: MAIN_CHANNEL.to_string(),
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

impl Step for EmptyUserStep {
    type Input = ();
    type Output = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, _state: &ConversationState) -> Result<()> {
        Ok(())
    }

    fn execute<'a>(&'a self, _input: &'a ()) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn finalize(&self, state: &mut ConversationState, _: (), _: ()) -> Result<Action> {
        state.channel_mut(&self.channel).push(Message::user(""));
        Ok(Action::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{RunContext, StepRunner};

    #[tokio::test]
    async fn test_appends_empty_user() {
        let mut state = ConversationState::new();
        EmptyUserStep::new("nudge")
            .run(&mut state, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(state.dialog().messages(), &[Message::user("")]);
    }

    #[tokio::test]
    async fn test_targets_channel() {
        let mut state = ConversationState::seeded("hi");
        EmptyUserStep::new("nudge")
            .on_channel("expert_1")
            .run(&mut state, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(state.dialog().len(), 1);
        assert_eq!(state.channel("expert_1").map(|d| d.len()), Some(1));
    }
}
