use serde::{Deserialize, Serialize};

use crate::models::{ChatSummary, Message};
use crate::types::{ChatId, MessageId};

/// Per-chat mutation delivered by the realtime message stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageEvent {
    /// A message was written (ours echoed back, or the peer's).
    Added(Message),

    /// A message's mutable fields changed.
    Updated(Message),

    /// A message was removed.
    Deleted(MessageId),
}

impl MessageEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            MessageEvent::Added(m) | MessageEvent::Updated(m) => &m.id,
            MessageEvent::Deleted(id) => id,
        }
    }
}

/// Chat-list signal delivered to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatSignal {
    /// The chat was created or its summary changed.
    Upsert(ChatSummary),

    /// The chat left this user's list. The shared chat object still exists.
    Removed(ChatId),
}

impl ChatSignal {
    /// Classify a raw summary payload from a backend that signals removal
    /// with an all-empty summary instead of an explicit tag.
    pub fn from_summary(summary: ChatSummary) -> Self {
        if summary.is_removal_sentinel() {
            ChatSignal::Removed(summary.chat_id)
        } else {
            ChatSignal::Upsert(summary)
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        match self {
            ChatSignal::Upsert(s) => &s.chat_id,
            ChatSignal::Removed(id) => id,
        }
    }
}
