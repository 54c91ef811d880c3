//! The backend collaborator the engine talks to.
//!
//! The engine never knows whether it is backed by a hosted document store,
//! a realtime tree store or an in-process fake: it only sees the
//! [`ChatBackend`] trait. Realtime feeds are handed out as an
//! [`EventStream`], a channel receiver paired with a [`Subscription`] that
//! detaches the listener when cancelled or dropped.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{ChatSummary, ImageRef, LastMessage, Message, Presence};
use crate::protocol::{ChatSignal, MessageEvent};
use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Subscription handles
// ---------------------------------------------------------------------------

/// Scoped handle to a live backend listener.
///
/// The listener is released exactly once: on [`Subscription::cancel`] or,
/// failing that, when the handle is dropped.
#[must_use = "dropping a Subscription detaches the listener immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn cancel(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A realtime feed: events arrive on `events` until the subscription is
/// cancelled or the backend disconnects (the receiver then yields `None`).
#[derive(Debug)]
pub struct EventStream<T> {
    pub events: mpsc::Receiver<T>,
    pub subscription: Subscription,
}

impl<T> EventStream<T> {
    pub fn new(events: mpsc::Receiver<T>, subscription: Subscription) -> Self {
        Self {
            events,
            subscription,
        }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Persistence, realtime feeds and blob storage used by the engine.
///
/// `NotFound` is returned when the referenced chat or message does not exist,
/// `TransientIo` for any transport failure and `UploadFailed` for blob
/// uploads.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Messages of a chat, oldest first.
    async fn fetch_initial_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>>;

    async fn subscribe_message_events(&self, chat_id: &ChatId)
        -> Result<EventStream<MessageEvent>>;

    /// Write a message (send, or finalize an uploaded image).
    async fn persist_message(&self, chat_id: &ChatId, message: &Message) -> Result<()>;

    async fn update_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        new_text: &str,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<()>;

    /// Create the chat if needed and return its summary.
    async fn ensure_chat(&self, chat_id: &ChatId, participants: [UserId; 2])
        -> Result<ChatSummary>;

    /// Drop `user_id`'s link to the chat. The chat itself survives.
    async fn remove_chat_membership(&self, user_id: &UserId, chat_id: &ChatId) -> Result<()>;

    async fn fetch_user_chats(&self, user_id: &UserId) -> Result<Vec<ChatSummary>>;

    async fn subscribe_chat_events(&self, user_id: &UserId) -> Result<EventStream<ChatSignal>>;

    /// Overwrite the chat's last-message fields with what the engine
    /// computed; `None` clears them.
    async fn update_chat_summary(&self, chat_id: &ChatId, last: Option<&LastMessage>)
        -> Result<()>;

    async fn upload_blob(&self, bytes: Bytes, destination_key: &str) -> Result<ImageRef>;

    /// Presence feed of one user. `None` means the node was never written.
    async fn observe_presence(&self, user_id: &UserId) -> Result<EventStream<Option<Presence>>>;

    async fn set_presence(&self, user_id: &UserId, presence: Presence) -> Result<()>;
}
