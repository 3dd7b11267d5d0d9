//! Append-only conversation logs exchanged with the narrative model.
//!
//! A [`Conversation`] is the ordered message history for one session:
//! moderator sessions, character sessions, and the planner each own exactly
//! one. During a moderation pass the log grows only by append; it is
//! discarded when the pass ends.

use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Instructions establishing the session's reality.
    System,
    /// Input from the driver (context, queries, tool results).
    User,
    /// The model's responses.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

/// An ordered, append-only message log for one model session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Create an empty conversation.
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append a system message.
    pub fn push_system(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: ChatRole::System,
            content: content.into(),
        });
    }

    /// Append a user message.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: ChatRole::User,
            content: content.into(),
        });
    }

    /// Append an assistant message.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: content.into(),
        });
    }

    /// All messages in append order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages in the log.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no message has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The first system message, if one was appended.
    pub fn system(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_appends_in_order() {
        let mut conversation = Conversation::new();
        conversation.push_system("You are Alice.");
        conversation.push_user("What do you intend?");
        conversation.push_assistant("I will find Bob.");

        assert_eq!(conversation.len(), 3);
        let roles: Vec<ChatRole> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]
        );
    }

    #[test]
    fn system_returns_first_system_message() {
        let mut conversation = Conversation::new();
        assert!(conversation.system().is_none());
        conversation.push_system("You are the moderator.");
        assert_eq!(conversation.system(), Some("You are the moderator."));
    }

    #[test]
    fn empty_conversation() {
        let conversation = Conversation::new();
        assert!(conversation.is_empty());
        assert_eq!(conversation.len(), 0);
    }
}
