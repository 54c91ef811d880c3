//! Notifications the engine sends to the UI layer.
//!
//! Every component publishes on one [`EventBus`]. Subscribers that lag
//! behind lose the oldest events; the UI re-reads state on each event, so
//! nothing is lost beyond the missed wake-ups.

use tokio::sync::broadcast;

use parley_shared::{ChatId, MessageId, Presence, SyncError, UserId};

/// Engine notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The open chat's message view changed.
    TimelineChanged { chat_id: ChatId },
    /// A backend call failed in a way the user should see.
    OperationFailed {
        chat_id: Option<ChatId>,
        message_id: Option<MessageId>,
        error: SyncError,
    },
    /// The chat's realtime feed dropped; the view may be stale until resync.
    SyncDegraded { chat_id: ChatId },
    /// A resync re-established the chat's realtime feed.
    SyncRestored { chat_id: ChatId },
    /// The aggregated chat list changed.
    ChatListChanged,
    /// The chat-list feed dropped.
    ChatListDegraded,
    PresenceChanged { user_id: UserId, presence: Presence },
}

/// Broadcast fan-out of [`SyncEvent`]s. Clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`. Having no subscriber is not an error.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}
