use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use parley_shared::Presence;
use parley_sync::SyncEvent;

pub const EVENT_TIMELINE_CHANGED: &str = "timeline-changed";
pub const EVENT_OPERATION_FAILED: &str = "operation-failed";
pub const EVENT_SYNC_DEGRADED: &str = "sync-degraded";
pub const EVENT_SYNC_RESTORED: &str = "sync-restored";
pub const EVENT_CHAT_LIST_CHANGED: &str = "chat-list-changed";
pub const EVENT_CHAT_LIST_DEGRADED: &str = "chat-list-degraded";
pub const EVENT_PRESENCE_CHANGED: &str = "presence-changed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePayload {
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen_at: i64,
}

/// An engine notification ready for the UI bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiEvent {
    pub event: &'static str,
    pub payload: Value,
}

fn payload<S: Serialize>(value: S) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize event payload");
        Value::Null
    })
}

impl From<&SyncEvent> for UiEvent {
    fn from(event: &SyncEvent) -> Self {
        match event {
            SyncEvent::TimelineChanged { chat_id } => UiEvent {
                event: EVENT_TIMELINE_CHANGED,
                payload: payload(ChatPayload {
                    chat_id: chat_id.to_string(),
                }),
            },
            SyncEvent::OperationFailed {
                chat_id,
                message_id,
                error,
            } => UiEvent {
                event: EVENT_OPERATION_FAILED,
                payload: payload(FailurePayload {
                    chat_id: chat_id.as_ref().map(|c| c.to_string()),
                    message_id: message_id.as_ref().map(|m| m.to_string()),
                    error: error.to_string(),
                }),
            },
            SyncEvent::SyncDegraded { chat_id } => UiEvent {
                event: EVENT_SYNC_DEGRADED,
                payload: payload(ChatPayload {
                    chat_id: chat_id.to_string(),
                }),
            },
            SyncEvent::SyncRestored { chat_id } => UiEvent {
                event: EVENT_SYNC_RESTORED,
                payload: payload(ChatPayload {
                    chat_id: chat_id.to_string(),
                }),
            },
            SyncEvent::ChatListChanged => UiEvent {
                event: EVENT_CHAT_LIST_CHANGED,
                payload: Value::Null,
            },
            SyncEvent::ChatListDegraded => UiEvent {
                event: EVENT_CHAT_LIST_DEGRADED,
                payload: Value::Null,
            },
            SyncEvent::PresenceChanged { user_id, presence } => {
                let Presence {
                    is_online,
                    last_seen_at,
                } = *presence;
                UiEvent {
                    event: EVENT_PRESENCE_CHANGED,
                    payload: payload(PresencePayload {
                        user_id: user_id.to_string(),
                        is_online,
                        last_seen_at,
                    }),
                }
            }
        }
    }
}

/// Encode `event` as one JSON line: `{"event": ..., "payload": ...}`.
pub fn encode(event: &SyncEvent) -> serde_json::Result<String> {
    serde_json::to_string(&UiEvent::from(event))
}

/// Forward every engine event to `out` as encoded JSON until either side
/// closes. A lagging receiver skips the missed events and keeps going.
pub fn spawn_event_bridge(
    mut events: broadcast::Receiver<SyncEvent>,
    out: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "UI bridge lagged behind engine events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let line = match encode(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, ?event, "Failed to encode event");
                    continue;
                }
            };
            if out.send(line).await.is_err() {
                debug!("UI bridge receiver dropped");
                break;
            }
        }
    })
}
