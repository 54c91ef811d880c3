use tracing::{debug, info};

use parley_shared::{ChatId, ChatSignal, ChatSummary, EventStream, LastMessage, Result, SyncError, UserId};

use crate::memory::{fan_out, MemoryBackend};

impl MemoryBackend {
    /// Create the chat if it does not exist and make sure both participants
    /// list it. Participants that (re)gain the chat get an `Upsert`.
    pub(crate) fn create_chat(&self, chat_id: &ChatId, participants: [UserId; 2]) -> ChatSummary {
        let now = self.clock.now();
        let mut inner = self.lock();

        let summary = inner
            .chats
            .entry(chat_id.clone())
            .or_insert_with(|| {
                info!(chat = %chat_id, "Chat created");
                ChatSummary::new(chat_id.clone(), participants.clone(), now)
            })
            .clone();

        for user in &participants {
            let chats = inner.memberships.entry(user.clone()).or_default();
            if chats.contains(chat_id) {
                continue;
            }
            chats.push(chat_id.clone());
            debug!(chat = %chat_id, user = %user, "Membership added");
            if let Some(listeners) = inner.chat_listeners.get_mut(user) {
                fan_out(listeners, ChatSignal::Upsert(summary.clone()));
            }
        }

        summary
    }

    pub(crate) fn leave_chat(&self, user_id: &UserId, chat_id: &ChatId) -> Result<()> {
        let mut inner = self.lock();
        let chats = inner
            .memberships
            .get_mut(user_id)
            .ok_or_else(|| SyncError::NotFound(format!("chat {chat_id}")))?;
        let pos = chats
            .iter()
            .position(|c| c == chat_id)
            .ok_or_else(|| SyncError::NotFound(format!("chat {chat_id}")))?;
        chats.remove(pos);

        info!(chat = %chat_id, user = %user_id, "Membership removed");
        if let Some(listeners) = inner.chat_listeners.get_mut(user_id) {
            fan_out(listeners, ChatSignal::Removed(chat_id.clone()));
        }
        Ok(())
    }

    pub(crate) fn chats_of(&self, user_id: &UserId) -> Vec<ChatSummary> {
        let inner = self.lock();
        inner
            .memberships
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.chats.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn listen_chats(&self, user_id: &UserId) -> EventStream<ChatSignal> {
        let user_id = user_id.clone();
        self.register(move |inner| inner.chat_listeners.entry(user_id.clone()).or_default())
    }

    /// Store `last` as given. The preview text was chosen by the writer.
    pub(crate) fn write_summary(&self, chat_id: &ChatId, last: Option<&LastMessage>) -> Result<()> {
        let mut inner = self.lock();
        let summary = {
            let chat = inner
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| SyncError::NotFound(format!("chat {chat_id}")))?;
            chat.set_last_message(last);
            chat.clone()
        };
        debug!(
            chat = %chat_id,
            last_at = ?summary.last_message_timestamp,
            "Chat summary written"
        );
        inner.notify_members(chat_id, ChatSignal::Upsert(summary));
        Ok(())
    }

    // -- Simulation helpers ------------------------------------------------

    pub fn chat(&self, chat_id: &ChatId) -> Option<ChatSummary> {
        self.lock().chats.get(chat_id).cloned()
    }

    /// Push a raw chat-list signal to one user's listeners.
    pub fn inject_chat_signal(&self, user_id: &UserId, signal: ChatSignal) {
        let mut inner = self.lock();
        if let Some(listeners) = inner.chat_listeners.get_mut(user_id) {
            fan_out(listeners, signal);
        }
    }

    pub fn chat_listener_count(&self, user_id: &UserId) -> usize {
        self.lock()
            .chat_listeners
            .get(user_id)
            .map(|l| l.iter().filter(|l| !l.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{ChatBackend, ManualClock, Message, MessageId};
    use std::sync::Arc;

    fn users() -> [UserId; 2] {
        [UserId::new("alice"), UserId::new("bob")]
    }

    #[tokio::test]
    async fn test_ensure_chat_is_idempotent() {
        let backend = MemoryBackend::with_clock(Arc::new(ManualClock::new(500)));
        let chat = ChatId::derive(&users()[0], &users()[1]);
        let first = backend.ensure_chat(&chat, users()).await.unwrap();
        let second = backend.ensure_chat(&chat, users()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.created_at, 500);
        assert_eq!(backend.fetch_user_chats(&users()[1]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_membership_removal_keeps_shared_chat() {
        let backend = MemoryBackend::new();
        let [alice, bob] = users();
        let chat = ChatId::derive(&alice, &bob);
        backend.ensure_chat(&chat, users()).await.unwrap();

        let mut alice_feed = backend.subscribe_chat_events(&alice).await.unwrap();
        backend.remove_chat_membership(&alice, &chat).await.unwrap();

        assert_eq!(alice_feed.recv().await, Some(ChatSignal::Removed(chat.clone())));
        assert!(backend.fetch_user_chats(&alice).await.unwrap().is_empty());
        assert_eq!(backend.fetch_user_chats(&bob).await.unwrap().len(), 1);
        assert!(backend.chat(&chat).is_some());
    }

    #[tokio::test]
    async fn test_summary_clear_is_explicit() {
        let backend = MemoryBackend::new();
        let [alice, bob] = users();
        let chat = ChatId::derive(&alice, &bob);
        backend.ensure_chat(&chat, users()).await.unwrap();

        let last = LastMessage {
            message_id: MessageId::from("m1"),
            text: "hi".into(),
            sender_id: alice.clone(),
            sent_at: 77,
        };
        backend.update_chat_summary(&chat, Some(&last)).await.unwrap();
        assert_eq!(backend.chat(&chat).unwrap().last_message_timestamp, Some(77));

        backend.update_chat_summary(&chat, None).await.unwrap();
        let summary = backend.chat(&chat).unwrap();
        assert_eq!(summary.last_message_text, None);
        assert_eq!(summary.last_message_timestamp, None);
    }

    #[tokio::test]
    async fn test_summary_keeps_writer_preview_text() {
        let backend = MemoryBackend::new();
        let [alice, bob] = users();
        let chat = ChatId::derive(&alice, &bob);
        backend.ensure_chat(&chat, users()).await.unwrap();

        let mut feed = backend.subscribe_chat_events(&bob).await.unwrap();
        let last = LastMessage {
            message_id: MessageId::from("img"),
            text: "Picture".into(),
            sender_id: alice,
            sent_at: 90,
        };
        backend.update_chat_summary(&chat, Some(&last)).await.unwrap();

        assert_eq!(backend.chat(&chat).unwrap().last_message_text.as_deref(), Some("Picture"));
        match feed.recv().await {
            Some(ChatSignal::Upsert(summary)) => {
                assert_eq!(summary.last_message_text.as_deref(), Some("Picture"))
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_send_uses_default_image_preview() {
        let backend = MemoryBackend::new();
        let [alice, bob] = users();
        let chat = ChatId::derive(&alice, &bob);
        backend.ensure_chat(&chat, users()).await.unwrap();

        let mut image = Message::outgoing_image(
            bob,
            "Bob",
            "",
            bytes::Bytes::from_static(b"jpg"),
            40,
            None,
        );
        image.is_uploading = false;
        backend.remote_send(&chat, image);
        assert_eq!(
            backend.chat(&chat).unwrap().last_message_text.as_deref(),
            Some(parley_shared::constants::IMAGE_PREVIEW_TEXT)
        );
    }

    #[tokio::test]
    async fn test_summary_for_unknown_chat_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .update_chat_summary(&ChatId::from("nobody_here"), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
