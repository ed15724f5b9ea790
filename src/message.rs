use serde::{Deserialize, Serialize};

/// A message in a conversation, containing a role and text content.
///
/// Messages carry caller-supplied chat history into the pipeline and are the
/// unit of exchange with the LLM gateway. Each message has a role (typically
/// "user", "assistant", or "system") and text content.
///
/// # Examples
///
/// ```
/// use kallgrund::message::ChatMessage;
///
/// let user_msg = ChatMessage::user("Vad säger GDPR om samtycke?");
/// let assistant_msg = ChatMessage::assistant("Enligt artikel 7 [1]...");
/// let system_msg = ChatMessage::system("Du är en saklig assistent.");
///
/// assert!(user_msg.has_role(ChatMessage::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    ///
    /// Use the constants on [`ChatMessage`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
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
    fn convenience_constructors() {
        let user_msg = ChatMessage::user("Hej");
        assert_eq!(user_msg.role, ChatMessage::USER);
        assert_eq!(user_msg.content, "Hej");

        let assistant_msg = ChatMessage::assistant("Hej på dig!");
        assert_eq!(assistant_msg.role, ChatMessage::ASSISTANT);

        let system_msg = ChatMessage::system("Du är hjälpsam");
        assert_eq!(system_msg.role, ChatMessage::SYSTEM);

        let custom_msg = ChatMessage::new("function", "klart");
        assert_eq!(custom_msg.role, "function");
    }

    #[test]
    fn role_checking() {
        let msg = ChatMessage::user("Hej");
        assert!(msg.has_role(ChatMessage::USER));
        assert!(!msg.has_role(ChatMessage::ASSISTANT));
        assert!(!msg.has_role(ChatMessage::SYSTEM));
    }

    #[test]
    fn serialization_round_trip() {
        let original = ChatMessage::user("Vad gäller enligt 2018:218?");
        let json = serde_json::to_string(&original).expect("serialize");
        let parsed: ChatMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(original, parsed);
    }
}
