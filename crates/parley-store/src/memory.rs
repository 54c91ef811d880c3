//! Backend state and the [`ChatBackend`] implementation.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! `.await`. Realtime listeners are bounded mpsc senders; a listener whose
//! receiver is gone is pruned on the next fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use parley_shared::constants::EVENT_BUFFER;
use parley_shared::{
    ChatBackend, ChatId, ChatSignal, ChatSummary, Clock, EventStream, ImageRef, LastMessage,
    Message, MessageEvent, MessageId, Presence, Result, Subscription, SyncError, SystemClock, UserId,
};

use crate::faults::{Faults, Op};

// ---------------------------------------------------------------------------
// Listener bookkeeping
// ---------------------------------------------------------------------------

pub(crate) struct Listener<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

impl<T> Listener<T> {
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send to this listener only. Returns false when it can't take the event.
    pub(crate) fn offer(&self, event: T) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// Deliver `event` to every listener, dropping the ones that went away.
pub(crate) fn fan_out<T: Clone>(listeners: &mut Vec<Listener<T>>, event: T) {
    listeners.retain(|l| match l.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(listener = l.id, "Listener buffer full, dropping event");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) messages: HashMap<ChatId, Vec<Message>>,
    pub(crate) chats: HashMap<ChatId, ChatSummary>,
    /// user -> chats in the order they joined the user's list
    pub(crate) memberships: HashMap<UserId, Vec<ChatId>>,
    pub(crate) blobs: HashMap<String, Bytes>,
    pub(crate) presence: HashMap<UserId, Presence>,

    pub(crate) message_listeners: HashMap<ChatId, Vec<Listener<MessageEvent>>>,
    pub(crate) chat_listeners: HashMap<UserId, Vec<Listener<ChatSignal>>>,
    pub(crate) presence_listeners: HashMap<UserId, Vec<Listener<Option<Presence>>>>,

    pub(crate) faults: Faults,
    next_listener_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    pub(crate) fn is_member(&self, user: &UserId, chat_id: &ChatId) -> bool {
        self.memberships
            .get(user)
            .map(|chats| chats.contains(chat_id))
            .unwrap_or(false)
    }

    /// Send `signal` to every participant of `chat_id` that still lists it.
    pub(crate) fn notify_members(&mut self, chat_id: &ChatId, signal: ChatSignal) {
        let participants = self
            .chats
            .get(chat_id)
            .map(|c| c.participants.clone())
            .unwrap_or_default();
        for user in participants {
            if !self.is_member(&user, chat_id) {
                continue;
            }
            if let Some(listeners) = self.chat_listeners.get_mut(&user) {
                fan_out(listeners, signal.clone());
            }
        }
    }

    pub(crate) fn notify_chat(&mut self, chat_id: &ChatId, event: MessageEvent) {
        if let Some(listeners) = self.message_listeners.get_mut(chat_id) {
            fan_out(listeners, event);
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-memory backend shared by every engine component under test.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct MemoryBackend {
    pub(crate) inner: Arc<Mutex<Inner>>,
    pub(crate) uploads_paused: Arc<watch::Sender<bool>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Backend whose server-side timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            uploads_paused: Arc::new(paused),
            clock,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call to `op` fail with `error`. Calls queue up.
    pub fn fail_next(&self, op: Op, error: SyncError) {
        self.lock().faults.push(op, error);
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: Op) -> usize {
        self.lock().faults.calls(op)
    }

    pub(crate) fn check(&self, op: Op) -> Result<()> {
        self.lock().faults.check(op)
    }

    /// Add a listener to the list selected by `pick` and hand out its stream.
    pub(crate) fn register<T, F>(&self, pick: F) -> EventStream<T>
    where
        T: Send + 'static,
        F: Fn(&mut Inner) -> &mut Vec<Listener<T>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id();
            pick(&mut *inner).push(Listener { id, tx });
            id
        };

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let subscription = Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                pick(&mut *inner).retain(|l| l.id != id);
                debug!(listener = id, "Listener released");
            }
        });

        EventStream::new(rx, subscription)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn fetch_initial_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        self.check(Op::FetchMessages)?;
        Ok(self.stored_messages(chat_id))
    }

    async fn subscribe_message_events(
        &self,
        chat_id: &ChatId,
    ) -> Result<EventStream<MessageEvent>> {
        self.check(Op::SubscribeMessages)?;
        Ok(self.listen_messages(chat_id))
    }

    async fn persist_message(&self, chat_id: &ChatId, message: &Message) -> Result<()> {
        self.check(Op::PersistMessage)?;
        self.store_message(chat_id, message);
        Ok(())
    }

    async fn update_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        new_text: &str,
    ) -> Result<()> {
        self.check(Op::UpdateMessage)?;
        self.edit_stored_message(chat_id, message_id, new_text)
    }

    async fn delete_message(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<()> {
        self.check(Op::DeleteMessage)?;
        self.remove_stored_message(chat_id, message_id)
    }

    async fn ensure_chat(
        &self,
        chat_id: &ChatId,
        participants: [UserId; 2],
    ) -> Result<ChatSummary> {
        self.check(Op::EnsureChat)?;
        Ok(self.create_chat(chat_id, participants))
    }

    async fn remove_chat_membership(&self, user_id: &UserId, chat_id: &ChatId) -> Result<()> {
        self.check(Op::RemoveMembership)?;
        self.leave_chat(user_id, chat_id)
    }

    async fn fetch_user_chats(&self, user_id: &UserId) -> Result<Vec<ChatSummary>> {
        self.check(Op::FetchChats)?;
        Ok(self.chats_of(user_id))
    }

    async fn subscribe_chat_events(&self, user_id: &UserId) -> Result<EventStream<ChatSignal>> {
        self.check(Op::SubscribeChats)?;
        Ok(self.listen_chats(user_id))
    }

    async fn update_chat_summary(
        &self,
        chat_id: &ChatId,
        last: Option<&LastMessage>,
    ) -> Result<()> {
        self.check(Op::UpdateSummary)?;
        self.write_summary(chat_id, last)
    }

    async fn upload_blob(&self, bytes: Bytes, destination_key: &str) -> Result<ImageRef> {
        self.wait_for_uploads().await;
        self.check(Op::UploadBlob)?;
        Ok(self.store_blob(bytes, destination_key))
    }

    async fn observe_presence(&self, user_id: &UserId) -> Result<EventStream<Option<Presence>>> {
        self.check(Op::ObservePresence)?;
        Ok(self.listen_presence(user_id))
    }

    async fn set_presence(&self, user_id: &UserId, presence: Presence) -> Result<()> {
        self.check(Op::SetPresence)?;
        self.write_presence(user_id, presence);
        Ok(())
    }
}
