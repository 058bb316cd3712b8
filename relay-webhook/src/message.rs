//! Message and conversation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged message, in the shape completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered message history for one conversation key.
///
/// The first message is the system prompt, inserted once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Conversation key (the sender's channel address)
    pub id: String,
    /// Messages in insertion order
    pub messages: Vec<ChatMessage>,
    /// When the conversation was first seen
    pub created_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Start a conversation seeded with the system prompt.
    pub fn new(id: impl Into<String>, system_prompt: &str) -> Self {
        Self {
            id: id.into(),
            messages: vec![ChatMessage::system(system_prompt)],
            created_at: Utc::now(),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    /// The last `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// Number of completed user/assistant exchanges.
    pub fn turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_single_system_message() {
        let ctx = ConversationContext::new("whatsapp:+100", "be nice");
        assert_eq!(ctx.messages, vec![ChatMessage::system("be nice")]);
        assert_eq!(ctx.turns(), 0);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut ctx = ConversationContext::new("k", "sys");
        for i in 0..4 {
            ctx.push_user(format!("q{i}"));
            ctx.push_assistant(format!("a{i}"));
        }

        let tail = ctx.recent(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0], ChatMessage::assistant("a2"));
        assert_eq!(tail[2], ChatMessage::assistant("a3"));

        assert_eq!(ctx.recent(100).len(), 9);
        assert_eq!(ctx.turns(), 4);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
        let role: Role = serde_json::from_str(r#""user""#).unwrap();
        assert_eq!(role, Role::User);
    }
}
