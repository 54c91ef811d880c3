//! Domain models exchanged between the engine, the backend and the UI.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer. Fields marked `#[serde(skip)]` are local-only
//! state that never reaches the backend.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Message payload kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// Durable reference to an uploaded image (download URL or storage path).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImageRef(pub String);

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local delivery state of a message. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeliveryState {
    /// Shown optimistically, backend has not acknowledged yet.
    Pending,
    /// Acknowledged by the backend or received from it.
    #[default]
    Sent,
    /// Persisting (or uploading) failed; waits for a user retry or discard.
    Failed { reason: String },
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Client-generated identity, stable across optimistic and confirmed state.
    pub id: MessageId,
    /// Message body, or the caption of an image message.
    pub text: String,
    pub sender_id: UserId,
    pub sender_name: String,
    /// Epoch seconds. `None` until first persisted.
    pub sent_at: Option<i64>,
    pub kind: MessageKind,
    pub image_ref: Option<ImageRef>,
    pub is_edited: bool,
    /// Back-reference to the message being replied to (lookup only).
    pub reply_to_id: Option<MessageId>,

    /// Raw image bytes shown while the upload is in flight.
    #[serde(skip)]
    pub local_image_bytes: Option<Bytes>,
    #[serde(skip)]
    pub is_uploading: bool,
    #[serde(skip)]
    pub upload_failed: bool,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Message {
    /// A new outgoing text message, pending until the backend acknowledges it.
    pub fn outgoing_text(
        sender_id: UserId,
        sender_name: impl Into<String>,
        text: impl Into<String>,
        sent_at: i64,
        reply_to_id: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            sender_id,
            sender_name: sender_name.into(),
            sent_at: Some(sent_at),
            kind: MessageKind::Text,
            image_ref: None,
            is_edited: false,
            reply_to_id,
            local_image_bytes: None,
            is_uploading: false,
            upload_failed: false,
            delivery: DeliveryState::Pending,
        }
    }

    /// Optimistic placeholder for an image that is still uploading.
    pub fn outgoing_image(
        sender_id: UserId,
        sender_name: impl Into<String>,
        caption: impl Into<String>,
        bytes: Bytes,
        sent_at: i64,
        reply_to_id: Option<MessageId>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            text: caption.into(),
            sender_id,
            sender_name: sender_name.into(),
            sent_at: Some(sent_at),
            kind: MessageKind::Image,
            image_ref: None,
            is_edited: false,
            reply_to_id,
            local_image_bytes: Some(bytes),
            is_uploading: true,
            upload_failed: false,
            delivery: DeliveryState::Pending,
        }
    }

    /// The persisted form of an uploaded image placeholder: same id and
    /// `sent_at`, reference set, local upload state cleared.
    pub fn finalized(&self, image_ref: ImageRef) -> Self {
        Self {
            image_ref: Some(image_ref),
            local_image_bytes: None,
            is_uploading: false,
            upload_failed: false,
            delivery: DeliveryState::Sent,
            ..self.clone()
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    /// Whether the backend holds this message.
    pub fn is_persisted(&self) -> bool {
        self.delivery == DeliveryState::Sent
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, DeliveryState::Failed { .. })
    }

    /// Summary snapshot of this message for the chat list.
    ///
    /// Image messages without a caption use `image_preview` as their text.
    pub fn to_last_message(&self, image_preview: &str) -> Option<LastMessage> {
        let sent_at = self.sent_at?;
        let text = match self.kind {
            MessageKind::Image if self.text.trim().is_empty() => image_preview.to_string(),
            _ => self.text.clone(),
        };
        Some(LastMessage {
            message_id: self.id.clone(),
            text,
            sender_id: self.sender_id.clone(),
            sent_at,
        })
    }
}

/// The last-message fields cached on a chat summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub message_id: MessageId,
    pub text: String,
    pub sender_id: UserId,
    pub sent_at: i64,
}

// ---------------------------------------------------------------------------
// Chat summary
// ---------------------------------------------------------------------------

/// Chat-list level state of one 1:1 conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    /// Exactly two participant ids for a real chat.
    pub participants: Vec<UserId>,
    /// Epoch seconds. Zero when unknown.
    pub created_at: i64,
    pub last_message_text: Option<String>,
    pub last_message_sender_id: Option<UserId>,
    pub last_message_timestamp: Option<i64>,
}

impl ChatSummary {
    pub fn new(chat_id: ChatId, participants: [UserId; 2], created_at: i64) -> Self {
        Self {
            chat_id,
            participants: participants.to_vec(),
            created_at,
            last_message_text: None,
            last_message_sender_id: None,
            last_message_timestamp: None,
        }
    }

    /// The legacy "remove from my list" payload: no participants, zero
    /// creation time and no last message.
    pub fn removal_sentinel(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            participants: Vec::new(),
            created_at: 0,
            last_message_text: None,
            last_message_sender_id: None,
            last_message_timestamp: None,
        }
    }

    pub fn is_removal_sentinel(&self) -> bool {
        self.participants.is_empty()
            && self.created_at == 0
            && self.last_message_text.is_none()
            && self.last_message_sender_id.is_none()
            && self.last_message_timestamp.is_none()
    }

    /// Replace (or explicitly clear) the cached last-message fields.
    pub fn set_last_message(&mut self, last: Option<&LastMessage>) {
        match last {
            Some(m) => {
                self.last_message_text = Some(m.text.clone());
                self.last_message_sender_id = Some(m.sender_id.clone());
                self.last_message_timestamp = Some(m.sent_at);
            }
            None => {
                self.last_message_text = None;
                self.last_message_sender_id = None;
                self.last_message_timestamp = None;
            }
        }
    }

    /// Chat-list sort key: last activity, falling back to creation time.
    pub fn activity_at(&self) -> Option<i64> {
        self.last_message_timestamp
            .or((self.created_at > 0).then_some(self.created_at))
    }

    /// The participant that is not `me`.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != me)
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Raw online/last-seen signal of one user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub is_online: bool,
    /// Epoch seconds.
    pub last_seen_at: i64,
}

impl Presence {
    pub fn online(now: i64) -> Self {
        Self {
            is_online: true,
            last_seen_at: now,
        }
    }

    /// Presence of a user whose presence node was never written.
    pub fn offline_since(now: i64) -> Self {
        Self {
            is_online: false,
            last_seen_at: now,
        }
    }
}
