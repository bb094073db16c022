use futures::future::BoxFuture;

use magnat_core::error::{MagnatError, Result};
use magnat_core::types::{Action, Message};
use magnat_core::ConversationState;

use crate::graph::Step;

/// Which message of the source channel gets copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Last,
    LastUser,
}

/// Copies a message of one channel onto the end of another.
///
/// Used to hand the user's question into a private sub-conversation and to
/// bring the sub-conversation's answer back to the main dialog.
pub struct ForwardStep {
    name: String,
    from: String,
    to: String,
    pick: Pick,
}

impl ForwardStep {
    /// Copies the last message of `from`, whatever its role.
    pub fn new(name: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            from: from.into(),
            to: to.into(),
            pick: Pick::Last,
        }
    }

    /// Copies the latest user turn of `from`, skipping any assistant
    /// messages appended after it.
    pub fn user_turn(
        name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            pick: Pick::LastUser,
            ..Self::new(name, from, to)
        }
    }
}

impl Step for ForwardStep {
    type Input = Message;
    type Output = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, state: &ConversationState) -> Result<Message> {
        let dialog = state.channel(&self.from);
        let found = match self.pick {
            Pick::Last => dialog.and_then(|d| d.last()),
            Pick::LastUser => dialog.and_then(|d| d.last_user()),
        };
        found.cloned().ok_or_else(|| MagnatError::ContractViolation {
            step: self.name.clone(),
            message: match self.pick {
                Pick::Last => format!("channel '{}' is empty", self.from),
                Pick::LastUser => format!("channel '{}' has no user message", self.from),
            },
        })
    }

    fn execute<'a>(&'a self, _message: &'a Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn finalize(&self, state: &mut ConversationState, message: Message, _: ()) -> Result<Action> {
        state.channel_mut(&self.to).push(message);
        Ok(Action::Default)
    }
}
