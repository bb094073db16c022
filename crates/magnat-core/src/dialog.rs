use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

/// Name of the main conversation channel.
pub const MAIN_CHANNEL: &str = "dialog";

static EMPTY: Dialog = Dialog {
    messages: Vec::new(),
};

/// Ordered, append-only sequence of messages.
///
/// Insertion order is turn order, and is exactly the order handed to the
/// generation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dialog {
    messages: Vec<Message>,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instruction message followed by every message of `dialog`.
    pub fn with_instruction(instruction: Message, dialog: &Dialog) -> Self {
        let mut out = Self {
            messages: Vec::with_capacity(dialog.len() + 1),
        };
        out.push(instruction);
        out.extend(dialog.iter().cloned());
        out
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// `self` followed by `other`.
    pub fn concat(mut self, other: &Dialog) -> Self {
        self.extend(other.iter().cloned());
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent assistant answer.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role() == Role::Assistant)
    }

    /// Most recent user turn.
    pub fn last_user(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role() == Role::User)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl Extend<Message> for Dialog {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        self.messages.extend(iter);
    }
}

impl FromIterator<Message> for Dialog {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dialog {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl std::ops::AddAssign<&Dialog> for Dialog {
    fn add_assign(&mut self, rhs: &Dialog) {
        self.extend(rhs.iter().cloned());
    }
}

/// Per-run container of named dialog channels shared by every step.
///
/// Channels are created on first write and never removed. The main channel
/// always exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    channels: BTreeMap<String, Dialog>,
}

impl Default for ConversationState {
    fn default() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(MAIN_CHANNEL.to_string(), Dialog::new());
        Self { channels }
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose main dialog starts with a single user turn.
    pub fn seeded(user_text: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.dialog_mut().push(Message::user(user_text));
        state
    }

    pub fn dialog(&self) -> &Dialog {
        self.channels.get(MAIN_CHANNEL).unwrap_or(&EMPTY)
    }

    pub fn dialog_mut(&mut self) -> &mut Dialog {
        self.channel_mut(MAIN_CHANNEL)
    }

    pub fn channel(&self, name: &str) -> Option<&Dialog> {
        self.channels.get(name)
    }

    /// Channel for writing, created empty if it does not exist yet.
    pub fn channel_mut(&mut self, name: &str) -> &mut Dialog {
        self.channels.entry(name.to_string()).or_default()
    }

    pub fn ensure_channel(&mut self, name: &str) {
        self.channel_mut(name);
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|k| k.as_str())
    }

    /// Message count per channel, for logging.
    pub fn sizes(&self) -> Vec<(&str, usize)> {
        self.channels
            .iter()
            .map(|(name, dialog)| (name.as_str(), dialog.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog_of(texts: &[&str]) -> Dialog {
        texts.iter().map(|t| Message::user(*t)).collect()
    }

    #[test]
    fn test_concat_preserves_order() {
        let a = dialog_of(&["a1", "a2"]);
        let b = dialog_of(&["b1", "b2", "b3"]);
        let joined = a.clone().concat(&b);

        let texts: Vec<&str> = joined.iter().map(|m| m.content()).collect();
        assert_eq!(texts, vec!["a1", "a2", "b1", "b2", "b3"]);
        // Operands are untouched.
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn test_add_assign_appends() {
        let mut a = dialog_of(&["x"]);
        a += &dialog_of(&["y", "z"]);
        let texts: Vec<&str> = a.iter().map(|m| m.content()).collect();
        assert_eq!(texts, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_with_instruction_prepends() {
        let d = dialog_of(&["Hello"]);
        let full = Dialog::with_instruction(Message::system("be nice"), &d);
        assert_eq!(full.len(), 2);
        assert_eq!(full.messages()[0].role(), Role::System);
        assert_eq!(full.messages()[1].content(), "Hello");
    }

    #[test]
    fn test_last_assistant_skips_tool_messages() {
        let mut d = Dialog::new();
        d.push(Message::user("q"));
        d.push(Message::assistant("first"));
        d.push(Message::Tool {
            tool_call_id: "c1".into(),
            name: "sum".into(),
            content: "5".into(),
            is_error: false,
        });
        assert_eq!(d.last_assistant().map(|m| m.content()), Some("first"));
        assert_eq!(d.last_user().map(|m| m.content()), Some("q"));
    }

    #[test]
    fn test_state_main_channel_always_present() {
        let state = ConversationState::new();
        assert!(state.dialog().is_empty());
        assert!(state.channel(MAIN_CHANNEL).is_some());
        assert!(state.channel("expert_1").is_none());
    }

    #[test]
    fn test_state_channels_created_on_write() {
        let mut state = ConversationState::seeded("Hello");
        state.channel_mut("expert_1").push(Message::user("sub"));

        assert_eq!(state.dialog().len(), 1);
        assert_eq!(state.channel("expert_1").map(|d| d.len()), Some(1));
        let names: Vec<&str> = state.channel_names().collect();
        assert_eq!(names, vec!["dialog", "expert_1"]);
    }

    #[test]
    fn test_dialog_serializes_as_list() {
        let d = dialog_of(&["hi"]);
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["role"], "user");
    }
}
