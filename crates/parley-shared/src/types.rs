use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CHAT_ID_SEPARATOR;

// User identity = opaque account id handed out by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-generated message identity. Stays the same from the optimistic
/// placeholder through every remote echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a 1:1 conversation.
///
/// Derived from both participant ids so that either side computes the same
/// value: `ChatId::derive(a, b) == ChatId::derive(b, a)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChatId(pub String);

impl ChatId {
    /// Derive the chat id for two participants using the default separator.
    pub fn derive(a: &UserId, b: &UserId) -> Self {
        Self::derive_with(a, b, CHAT_ID_SEPARATOR)
    }

    /// Derive the chat id for two participants: sort both ids and join them.
    pub fn derive_with(a: &UserId, b: &UserId, separator: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", first.0, separator, second.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage key for an image attached to a message in this chat.
    pub fn blob_key(&self, root: &str, message_id: &MessageId) -> String {
        format!("{}/{}/{}.jpg", root, self.0, message_id)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
