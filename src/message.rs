use serde::{Deserialize, Serialize};

/// A single turn in a conversation thread: a role plus text content.
///
/// Messages are the durable unit of chat history. Every pipeline invocation
/// appends exactly one user message up front and (unless a stage fails) one
/// assistant message at the end.
///
/// # Examples
///
/// ```
/// use ragline::message::Message;
///
/// let question = Message::user("How do I reset my password?");
/// let answer = Message::assistant("Open Settings and choose \"Reset password\".");
/// assert!(question.has_role(Message::USER));
/// assert!(answer.has_role(Message::ASSISTANT));
/// ```
///
/// Messages serialize to plain `{"role": ..., "content": ...}` JSON, which is
/// also the shape stored by the checkpointers:
///
/// ```
/// use ragline::message::Message;
///
/// let msg = Message::user("hello");
/// let json = serde_json::to_string(&msg).unwrap();
/// let parsed: Message = serde_json::from_str(&json).unwrap();
/// assert_eq!(msg, parsed);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the sender. Use the constants on [`Message`] for the
    /// standardized values.
    pub role: String,
    /// The text content of the turn.
    pub content: String,
}

impl Message {
    /// End-user question role.
    pub const USER: &'static str = "user";
    /// Model (or cache) response role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convenience_constructors_set_roles() {
        assert_eq!(Message::user("q").role, Message::USER);
        assert_eq!(Message::assistant("a").role, Message::ASSISTANT);
        assert_eq!(Message::system("s").role, Message::SYSTEM);

        let custom = Message::new("tool", "result: 42");
        assert_eq!(custom.role, "tool");
        assert_eq!(custom.content, "result: 42");
    }

    #[test]
    fn role_checks() {
        let msg = Message::user("hello");
        assert!(msg.has_role(Message::USER));
        assert!(!msg.has_role(Message::ASSISTANT));
        assert!(!msg.has_role(Message::SYSTEM));
    }

    #[test]
    fn round_trips_through_json() {
        let original = Message::assistant("Your refund is on its way.");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }
}
