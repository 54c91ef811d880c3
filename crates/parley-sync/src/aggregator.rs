//! Chat-list aggregation for the signed-in user.
//!
//! [`ChatList`] is the pure ordered state. [`ChatSummaryAggregator`] feeds it
//! from the backend's chat signals and from the completion signals that
//! reconcilers send after a confirmed send, edit or delete, so the list
//! moves before the remote summary echo arrives.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_shared::{ChatBackend, ChatId, ChatSignal, ChatSummary, EventStream, Result};

use crate::events::{EventBus, SyncEvent};
use crate::last_message::{SummaryChange, SummarySink, SummaryUpdate};
use crate::session::{Session, SyncContext};

// ---------------------------------------------------------------------------
// ChatList
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    summary: ChatSummary,
    /// Insertion order, the tie breaker.
    seq: u64,
}

/// Most recent activity first; chats without any activity last; ties keep
/// insertion order.
fn by_recency(a: &Entry, b: &Entry) -> Ordering {
    match (a.summary.activity_at(), b.summary.activity_at()) {
        (Some(x), Some(y)) => y.cmp(&x).then(a.seq.cmp(&b.seq)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.seq.cmp(&b.seq),
    }
}

/// Ordered chat summaries, unique by chat id.
#[derive(Debug, Clone, Default)]
pub struct ChatList {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl ChatList {
    pub fn chats(&self) -> Vec<ChatSummary> {
        self.entries.iter().map(|e| e.summary.clone()).collect()
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<&ChatSummary> {
        self.entries
            .iter()
            .find(|e| &e.summary.chat_id == chat_id)
            .map(|e| &e.summary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, chat_id: &ChatId) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| &e.summary.chat_id == chat_id)
    }

    fn sort(&mut self) {
        self.entries.sort_by(by_recency);
    }

    /// Insert or merge a summary. A removal-shaped payload only ever removes.
    pub fn upsert(&mut self, summary: ChatSummary) -> bool {
        if summary.is_removal_sentinel() {
            return self.remove(&summary.chat_id);
        }
        match self.entry_mut(&summary.chat_id) {
            Some(entry) => {
                if entry.summary == summary {
                    return false;
                }
                entry.summary = summary;
            }
            None => {
                self.next_seq += 1;
                self.entries.push(Entry {
                    summary,
                    seq: self.next_seq,
                });
            }
        }
        self.sort();
        true
    }

    pub fn remove(&mut self, chat_id: &ChatId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.summary.chat_id != chat_id);
        self.entries.len() != before
    }

    pub fn apply_signal(&mut self, signal: ChatSignal) -> bool {
        match signal {
            ChatSignal::Upsert(summary) => self.upsert(summary),
            ChatSignal::Removed(chat_id) => self.remove(&chat_id),
        }
    }

    /// Fold a local completion signal. Unknown chats are ignored.
    pub fn apply_update(&mut self, update: &SummaryUpdate) -> bool {
        let Some(entry) = self.entry_mut(&update.chat_id) else {
            return false;
        };
        let changed = match &update.change {
            SummaryChange::Sent(last) => {
                let newer = entry
                    .summary
                    .last_message_timestamp
                    .map(|current| last.sent_at >= current)
                    .unwrap_or(true);
                if newer {
                    entry.summary.set_last_message(Some(last));
                }
                newer
            }
            SummaryChange::Recomputed { replaced_at, last } => {
                let overtaken = matches!(
                    (entry.summary.last_message_timestamp, replaced_at),
                    (Some(current), Some(replaced)) if current > *replaced
                );
                if !overtaken {
                    entry.summary.set_last_message(last.as_ref());
                }
                !overtaken
            }
        };
        if changed {
            self.sort();
        }
        changed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// ChatSummaryAggregator
// ---------------------------------------------------------------------------

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<mpsc::UnboundedReceiver<SummaryUpdate>>,
}

struct Shared {
    backend: Arc<dyn ChatBackend>,
    session: Session,
    events: EventBus,
    list: Mutex<ChatList>,
    completions_tx: mpsc::UnboundedSender<SummaryUpdate>,
    completions_rx: Mutex<Option<mpsc::UnboundedReceiver<SummaryUpdate>>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

/// Maintains the signed-in user's chat list.
#[derive(Clone)]
pub struct ChatSummaryAggregator {
    shared: Arc<Shared>,
}

impl ChatSummaryAggregator {
    pub fn new(ctx: &SyncContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                backend: Arc::clone(&ctx.backend),
                session: ctx.session.clone(),
                events: ctx.events.clone(),
                list: Mutex::new(ChatList::default()),
                completions_tx: tx,
                completions_rx: Mutex::new(Some(rx)),
                running: tokio::sync::Mutex::new(None),
            }),
        }
    }

    fn list(&self) -> MutexGuard<'_, ChatList> {
        self.shared.list.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Completion channel for reconcilers. Updates sent while the aggregator
    /// is stopped are applied once it starts.
    pub fn sink(&self) -> SummarySink {
        SummarySink::new(self.shared.completions_tx.clone())
    }

    /// Load the user's chats and follow their signals until [`stop`](Self::stop).
    /// Restarting reloads the list from scratch.
    pub async fn start(&self) -> Result<()> {
        let user = self.shared.session.require_user()?;
        self.stop().await;

        let mut running = self.shared.running.lock().await;
        let stream = self.shared.backend.subscribe_chat_events(&user.id).await?;
        let chats = self.shared.backend.fetch_user_chats(&user.id).await?;

        {
            let mut list = self.list();
            list.clear();
            for summary in chats {
                list.upsert(summary);
            }
            info!(user = %user.id, chats = list.len(), "Chat list loaded");
        }
        self.shared.events.emit(SyncEvent::ChatListChanged);

        let completions = self
            .shared
            .completions_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(completions) = completions else {
            warn!("Completion channel lost, chat list runs without local updates");
            return Ok(());
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().run(stream, completions, shutdown_rx));
        *running = Some(Running {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    async fn run(
        self,
        stream: EventStream<ChatSignal>,
        mut completions: mpsc::UnboundedReceiver<SummaryUpdate>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> mpsc::UnboundedReceiver<SummaryUpdate> {
        let EventStream {
            events: mut signals,
            subscription,
        } = stream;
        let mut live = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                signal = signals.recv(), if live => match signal {
                    Some(signal) => {
                        let chat_id = signal.chat_id().clone();
                        let changed = self.list().apply_signal(signal);
                        debug!(chat = %chat_id, changed, "Chat signal");
                        if changed {
                            self.shared.events.emit(SyncEvent::ChatListChanged);
                        }
                    }
                    None => {
                        warn!("Chat list feed ended");
                        live = false;
                        self.shared.events.emit(SyncEvent::ChatListDegraded);
                    }
                },
                Some(update) = completions.recv() => {
                    let changed = self.list().apply_update(&update);
                    debug!(chat = %update.chat_id, changed, "Local summary update");
                    if changed {
                        self.shared.events.emit(SyncEvent::ChatListChanged);
                    }
                }
            }
        }

        subscription.cancel();
        completions
    }

    /// Stop following signals. The list keeps its last state.
    pub async fn stop(&self) {
        let Some(running) = self.shared.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        match running.task.await {
            Ok(completions) => {
                *self
                    .shared
                    .completions_rx
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(completions);
                info!("Chat list stopped");
            }
            Err(e) => warn!(error = %e, "Chat list task failed"),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shared.running.lock().await.is_some()
    }

    /// Record a chat this client just created or opened.
    pub fn record_created(&self, summary: ChatSummary) {
        if self.list().upsert(summary) {
            self.shared.events.emit(SyncEvent::ChatListChanged);
        }
    }

    /// Drop a chat whose membership removal was confirmed.
    pub fn record_removed(&self, chat_id: &ChatId) {
        if self.list().remove(chat_id) {
            self.shared.events.emit(SyncEvent::ChatListChanged);
        }
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.list().chats()
    }

    pub fn chat(&self, chat_id: &ChatId) -> Option<ChatSummary> {
        self.list().get(chat_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{LastMessage, MessageId, UserId};

    fn summary(id: &str, created_at: i64, last_at: Option<i64>) -> ChatSummary {
        let mut s = ChatSummary::new(
            ChatId::from(id),
            [UserId::new("alice"), UserId::new("bob")],
            created_at,
        );
        s.last_message_timestamp = last_at;
        s
    }

    fn last(at: i64, text: &str) -> LastMessage {
        LastMessage {
            message_id: MessageId::from(text),
            text: text.into(),
            sender_id: UserId::new("alice"),
            sent_at: at,
        }
    }

    fn ids(list: &ChatList) -> Vec<String> {
        list.chats().into_iter().map(|c| c.chat_id.0).collect()
    }

    #[test]
    fn test_order_by_activity_then_insertion() {
        let mut list = ChatList::default();
        list.upsert(summary("quiet", 0, None));
        list.upsert(summary("old", 10, None));
        list.upsert(summary("busy", 5, Some(50)));
        list.upsert(summary("tie", 50, None));
        assert_eq!(ids(&list), vec!["busy", "tie", "old", "quiet"]);
    }

    #[test]
    fn test_upsert_merges_by_id() {
        let mut list = ChatList::default();
        assert!(list.upsert(summary("a", 10, None)));
        assert!(!list.upsert(summary("a", 10, None)));
        assert!(list.upsert(summary("a", 10, Some(20))));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(&ChatId::from("a")).unwrap().last_message_timestamp, Some(20));
    }

    #[test]
    fn test_sent_completion_never_moves_summary_backwards() {
        let mut list = ChatList::default();
        list.upsert(summary("a", 10, Some(40)));

        let stale = SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Sent(last(30, "old")),
        };
        assert!(!list.apply_update(&stale));

        let fresh = SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Sent(last(45, "new")),
        };
        assert!(list.apply_update(&fresh));
        assert_eq!(
            list.get(&ChatId::from("a")).unwrap().last_message_text.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_recomputed_completion_can_clear() {
        let mut list = ChatList::default();
        list.upsert(summary("a", 10, Some(40)));
        list.upsert(summary("b", 20, None));
        assert_eq!(ids(&list), vec!["a", "b"]);

        list.apply_update(&SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Recomputed {
                replaced_at: Some(40),
                last: None,
            },
        });
        let a = list.get(&ChatId::from("a")).unwrap();
        assert_eq!(a.last_message_timestamp, None);
        assert_eq!(a.last_message_text, None);
        // falls back to created_at = 10
        assert_eq!(ids(&list), vec!["b", "a"]);
    }

    #[test]
    fn test_recomputed_completion_yields_to_newer_send() {
        let mut list = ChatList::default();
        list.upsert(summary("a", 10, Some(40)));
        list.apply_update(&SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Sent(last(50, "newer")),
        });

        // an edit of the message at 40 confirmed after the send at 50
        let late_edit = SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Recomputed {
                replaced_at: Some(40),
                last: Some(last(40, "edited")),
            },
        };
        assert!(!list.apply_update(&late_edit));
        let a = list.get(&ChatId::from("a")).unwrap();
        assert_eq!(a.last_message_text.as_deref(), Some("newer"));
        assert_eq!(a.last_message_timestamp, Some(50));

        let delete_newest = SummaryUpdate {
            chat_id: ChatId::from("a"),
            change: SummaryChange::Recomputed {
                replaced_at: Some(50),
                last: Some(last(40, "edited")),
            },
        };
        assert!(list.apply_update(&delete_newest));
        assert_eq!(list.get(&ChatId::from("a")).unwrap().last_message_timestamp, Some(40));
    }

    #[test]
    fn test_completion_for_unknown_chat_is_ignored() {
        let mut list = ChatList::default();
        assert!(!list.apply_update(&SummaryUpdate {
            chat_id: ChatId::from("ghost"),
            change: SummaryChange::Sent(last(1, "x")),
        }));
        assert!(list.is_empty());
    }

    #[test]
    fn test_removed_signal() {
        let mut list = ChatList::default();
        list.upsert(summary("a", 10, None));
        assert!(list.apply_signal(ChatSignal::Removed(ChatId::from("a"))));
        assert!(!list.apply_signal(ChatSignal::Removed(ChatId::from("a"))));
        assert!(list.is_empty());
    }
}
