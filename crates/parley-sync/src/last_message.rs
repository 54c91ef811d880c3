//! Keeps a chat's cached last-message fields on the chronologically latest
//! persisted message.
//!
//! The reconciler decides *whether* a confirmed operation touched the
//! latest message from its own view, then calls in here to write the
//! backend summary and to tell the chat list through a [`SummarySink`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::{ChatBackend, ChatId, LastMessage, Message, MessageId, Result};

// ---------------------------------------------------------------------------
// Completion signals
// ---------------------------------------------------------------------------

/// How a confirmed operation moved a chat's last message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryChange {
    /// A send was confirmed; applies unless the list already holds a newer one.
    Sent(LastMessage),
    /// The latest message, sent at `replaced_at`, was edited or deleted and
    /// `last` is what the chat shows now; `None` clears the fields. Ignored
    /// when the list already holds a message newer than `replaced_at`.
    Recomputed {
        replaced_at: Option<i64>,
        last: Option<LastMessage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryUpdate {
    pub chat_id: ChatId,
    pub change: SummaryChange,
}

/// Sending half of the aggregator's completion channel.
#[derive(Debug, Clone, Default)]
pub struct SummarySink {
    tx: Option<mpsc::UnboundedSender<SummaryUpdate>>,
}

impl SummarySink {
    pub fn new(tx: mpsc::UnboundedSender<SummaryUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every update, for a reconciler without a chat list.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn send(&self, update: SummaryUpdate) {
        if let Some(tx) = &self.tx {
            if tx.send(update).is_err() {
                debug!("Chat list gone, summary update dropped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate selection
// ---------------------------------------------------------------------------

/// Latest persisted message by `sent_at`; among equal timestamps the one
/// that comes last in view order.
pub fn latest_persisted<'a, I>(messages: I) -> Option<&'a Message>
where
    I: IntoIterator<Item = &'a Message>,
{
    messages
        .into_iter()
        .filter(|m| m.is_persisted() && m.sent_at.is_some())
        .max_by_key(|m| m.sent_at)
}

pub fn is_latest(latest: Option<&Message>, id: &MessageId) -> bool {
    latest.map(|m| &m.id == id).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Enforcement
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LastMessageInvariant {
    backend: Arc<dyn ChatBackend>,
    sink: SummarySink,
    image_preview: String,
}

impl LastMessageInvariant {
    pub fn new(backend: Arc<dyn ChatBackend>, sink: SummarySink, image_preview: String) -> Self {
        Self {
            backend,
            sink,
            image_preview,
        }
    }

    fn snapshot(&self, message: Option<&Message>) -> Option<LastMessage> {
        message.and_then(|m| m.to_last_message(&self.image_preview))
    }

    /// Point the summary at a confirmed send if it is the `latest` one. A
    /// slow image upload can be overtaken by a newer message. Returns
    /// whether it was written.
    pub async fn after_send(
        &self,
        chat_id: &ChatId,
        latest: Option<&Message>,
        sent: &Message,
    ) -> Result<bool> {
        if !is_latest(latest, &sent.id) {
            debug!(chat = %chat_id, msg = %sent.id, "Sent message was overtaken");
            return Ok(false);
        }
        let last = self.snapshot(Some(sent));
        if let Some(last) = &last {
            self.sink.send(SummaryUpdate {
                chat_id: chat_id.clone(),
                change: SummaryChange::Sent(last.clone()),
            });
        }
        self.write(chat_id, last.as_ref()).await.map(|_| true)
    }

    /// Rewrite the summary if `edited` is the latest message. Returns
    /// whether it was.
    pub async fn after_edit(
        &self,
        chat_id: &ChatId,
        latest: Option<&Message>,
        edited: &Message,
    ) -> Result<bool> {
        if !is_latest(latest, &edited.id) {
            debug!(chat = %chat_id, msg = %edited.id, "Edited message is not the latest");
            return Ok(false);
        }
        self.publish(chat_id, edited.sent_at, Some(edited)).await.map(|_| true)
    }

    /// Recompute the summary from `remaining` if the deleted message was the
    /// latest. An empty chat clears the fields.
    pub async fn after_delete(
        &self,
        chat_id: &ChatId,
        deleted: &MessageId,
        latest_before: Option<&Message>,
        remaining: Option<&Message>,
    ) -> Result<bool> {
        if !is_latest(latest_before, deleted) {
            debug!(chat = %chat_id, msg = %deleted, "Deleted message was not the latest");
            return Ok(false);
        }
        debug!(
            chat = %chat_id,
            new_latest = ?remaining.map(|m| &m.id),
            "Recomputing last message after delete"
        );
        let replaced_at = latest_before.and_then(|m| m.sent_at);
        self.publish(chat_id, replaced_at, remaining).await.map(|_| true)
    }

    async fn publish(
        &self,
        chat_id: &ChatId,
        replaced_at: Option<i64>,
        last: Option<&Message>,
    ) -> Result<()> {
        let last = self.snapshot(last);
        self.sink.send(SummaryUpdate {
            chat_id: chat_id.clone(),
            change: SummaryChange::Recomputed {
                replaced_at,
                last: last.clone(),
            },
        });
        self.write(chat_id, last.as_ref()).await
    }

    async fn write(&self, chat_id: &ChatId, last: Option<&LastMessage>) -> Result<()> {
        match self.backend.update_chat_summary(chat_id, last).await {
            Err(e) if e.is_not_found() => {
                debug!(chat = %chat_id, "Chat gone, summary not written");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{DeliveryState, UserId};

    fn persisted(id: &str, at: i64) -> Message {
        let mut m = Message::outgoing_text(UserId::new("alice"), "Alice", id, at, None);
        m.id = MessageId::from(id);
        m.delivery = DeliveryState::Sent;
        m
    }

    #[test]
    fn test_latest_ignores_unconfirmed_messages() {
        let mut pending = persisted("p", 99);
        pending.delivery = DeliveryState::Pending;
        let failed = Message {
            delivery: DeliveryState::Failed {
                reason: "offline".into(),
            },
            ..persisted("f", 100)
        };
        let view = vec![persisted("a", 10), persisted("b", 20), pending, failed];
        assert_eq!(latest_persisted(&view).map(|m| m.id.as_str()), Some("b"));
    }

    #[test]
    fn test_latest_tie_prefers_later_entry() {
        let view = vec![persisted("a", 10), persisted("b", 10)];
        assert_eq!(latest_persisted(&view).map(|m| m.id.as_str()), Some("b"));
        assert!(latest_persisted(&Vec::<Message>::new()).is_none());
    }

    #[test]
    fn test_is_latest() {
        let m = persisted("a", 10);
        assert!(is_latest(Some(&m), &MessageId::from("a")));
        assert!(!is_latest(Some(&m), &MessageId::from("b")));
        assert!(!is_latest(None, &MessageId::from("a")));
    }

    #[tokio::test]
    async fn test_detached_sink_drops_updates() {
        let cleared = SummaryChange::Recomputed {
            replaced_at: Some(10),
            last: None,
        };
        SummarySink::detached().send(SummaryUpdate {
            chat_id: ChatId::from("a_b"),
            change: cleared.clone(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = SummarySink::new(tx);
        sink.send(SummaryUpdate {
            chat_id: ChatId::from("a_b"),
            change: cleared.clone(),
        });
        assert_eq!(rx.recv().await.map(|u| u.change), Some(cleared));
    }
}
