use futures::future::BoxFuture;
use tracing::debug;

use magnat_core::error::Result;
use magnat_core::types::Action;
use magnat_core::ConversationState;

use crate::graph::Step;

/// Logs the shape of the conversation state and passes through.
pub struct DebugStep {
    name: String,
}

impl DebugStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for DebugStep {
    type Input = Vec<(String, usize)>;
    type Output = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, state: &ConversationState) -> Result<Self::Input> {
        Ok(state
            .sizes()
            .into_iter()
            .map(|(name, len)| (name.to_string(), len))
            .collect())
    }

    fn execute<'a>(&'a self, _input: &'a Self::Input) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn finalize(
        &self,
        state: &mut ConversationState,
        sizes: Self::Input,
        _: (),
    ) -> Result<Action> {
        let last = state
            .dialog()
            .last()
            .map(|m| format!("{}: {}", m.role(), m.content()));
        debug!(step = %self.name, channels = ?sizes, last = ?last, "Conversation state");
        Ok(Action::Default)
    }
}
