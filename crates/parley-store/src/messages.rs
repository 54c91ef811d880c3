use tracing::debug;

use parley_shared::constants::IMAGE_PREVIEW_TEXT;
use parley_shared::{
    ChatId, DeliveryState, EventStream, Message, MessageEvent, MessageId, Result, SyncError,
};

use crate::memory::MemoryBackend;

/// Strip local-only state: what the backend keeps is the persisted form.
fn persisted_form(message: &Message) -> Message {
    let mut stored = message.clone();
    stored.local_image_bytes = None;
    stored.is_uploading = false;
    stored.upload_failed = false;
    stored.delivery = DeliveryState::Sent;
    stored
}

impl MemoryBackend {
    pub(crate) fn stored_messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.lock()
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn listen_messages(&self, chat_id: &ChatId) -> EventStream<MessageEvent> {
        let chat_id = chat_id.clone();
        self.register(move |inner| inner.message_listeners.entry(chat_id.clone()).or_default())
    }

    /// Insert or overwrite (same id) a message and echo it as `Added`.
    pub(crate) fn store_message(&self, chat_id: &ChatId, message: &Message) {
        let stored = persisted_form(message);
        let mut inner = self.lock();
        let list = inner.messages.entry(chat_id.clone()).or_default();
        match list.iter_mut().find(|m| m.id == stored.id) {
            Some(existing) => *existing = stored.clone(),
            None => {
                let at = stored.sent_at.unwrap_or(i64::MAX);
                let pos = list.partition_point(|m| m.sent_at.unwrap_or(i64::MAX) <= at);
                list.insert(pos, stored.clone());
            }
        }
        debug!(chat = %chat_id, msg = %stored.id, "Stored message");
        inner.notify_chat(chat_id, MessageEvent::Added(stored));
    }

    pub(crate) fn edit_stored_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        new_text: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        let updated = {
            let message = inner
                .messages
                .get_mut(chat_id)
                .and_then(|list| list.iter_mut().find(|m| &m.id == message_id))
                .ok_or_else(|| SyncError::NotFound(format!("message {message_id}")))?;
            message.text = new_text.to_string();
            message.is_edited = true;
            message.clone()
        };
        inner.notify_chat(chat_id, MessageEvent::Updated(updated));
        Ok(())
    }

    pub(crate) fn remove_stored_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
    ) -> Result<()> {
        let mut inner = self.lock();
        let list = inner
            .messages
            .get_mut(chat_id)
            .ok_or_else(|| SyncError::NotFound(format!("chat {chat_id}")))?;
        let pos = list
            .iter()
            .position(|m| &m.id == message_id)
            .ok_or_else(|| SyncError::NotFound(format!("message {message_id}")))?;
        list.remove(pos);
        inner.notify_chat(chat_id, MessageEvent::Deleted(message_id.clone()));
        Ok(())
    }

    // -- Simulation helpers ------------------------------------------------

    /// Seed a chat's history without emitting events.
    pub fn seed_messages(&self, chat_id: &ChatId, messages: Vec<Message>) {
        let mut list: Vec<Message> = messages.iter().map(persisted_form).collect();
        list.sort_by_key(|m| m.sent_at.unwrap_or(i64::MAX));
        self.lock().messages.insert(chat_id.clone(), list);
    }

    /// Messages currently held for `chat_id`, oldest first.
    pub fn messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.stored_messages(chat_id)
    }

    /// The other participant writes a message: stored, echoed to listeners,
    /// and the chat summary advanced, as their client would do.
    pub fn remote_send(&self, chat_id: &ChatId, message: Message) {
        self.store_message(chat_id, &message);
        // A summary for an unknown chat is simply not written.
        let last = message.to_last_message(IMAGE_PREVIEW_TEXT);
        let _ = self.write_summary(chat_id, last.as_ref());
    }

    pub fn remote_edit(&self, chat_id: &ChatId, message_id: &MessageId, new_text: &str) -> Result<()> {
        self.edit_stored_message(chat_id, message_id, new_text)
    }

    pub fn remote_delete(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<()> {
        self.remove_stored_message(chat_id, message_id)
    }

    /// Push a raw event to the chat's listeners without touching storage.
    pub fn inject_message_event(&self, chat_id: &ChatId, event: MessageEvent) {
        self.lock().notify_chat(chat_id, event);
    }

    /// Drop every message listener of `chat_id`, as a lost connection would.
    pub fn disconnect_message_listeners(&self, chat_id: &ChatId) {
        self.lock().message_listeners.remove(chat_id);
    }

    pub fn message_listener_count(&self, chat_id: &ChatId) -> usize {
        self.lock()
            .message_listeners
            .get(chat_id)
            .map(|l| l.iter().filter(|l| !l.is_closed()).count())
            .unwrap_or(0)
    }
}
