#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use parley_shared::constants::IMAGE_PREVIEW_TEXT;
use parley_shared::{
    ChatBackend, ChatId, ChatSignal, ChatSummary, EventStream, ImageRef, LastMessage,
    ManualClock, Message, MessageEvent, MessageId, Presence, Result, UserId,
};
use parley_store::MemoryBackend;
use parley_sync::{
    ChatSummaryAggregator, CurrentUser, MessageReconciler, Session, SummarySink, SyncConfig,
    SyncContext,
};

pub const START: i64 = 1_000;

/// Alice's engine against an in-memory backend, with a chat between Alice
/// and Bob already created.
pub struct Harness {
    pub backend: MemoryBackend,
    pub clock: ManualClock,
    pub ctx: SyncContext,
    pub delays: Arc<Delays>,
    pub alice: UserId,
    pub bob: UserId,
    pub chat: ChatId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    pub async fn with_config(config: SyncConfig) -> Self {
        let clock = ManualClock::new(START);
        let backend = MemoryBackend::with_clock(Arc::new(clock.clone()));
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let chat = ChatId::derive(&alice, &bob);
        backend
            .ensure_chat(&chat, [alice.clone(), bob.clone()])
            .await
            .unwrap();

        let delays = Arc::new(Delays::default());
        let engine_backend = Delayed {
            inner: backend.clone(),
            delays: delays.clone(),
        };
        let session = Session::signed_in(CurrentUser::new("alice", "Alice"));
        let ctx = SyncContext::new(
            Arc::new(engine_backend),
            session,
            Arc::new(clock.clone()),
            config,
        );
        Self {
            backend,
            clock,
            ctx,
            delays,
            alice,
            bob,
            chat,
        }
    }

    pub fn reconciler(&self) -> MessageReconciler {
        MessageReconciler::new(&self.ctx, SummarySink::detached())
    }

    pub fn aggregator(&self) -> ChatSummaryAggregator {
        ChatSummaryAggregator::new(&self.ctx)
    }

    /// Reconciler wired to `aggregator`'s completion channel, chat opened.
    pub async fn open_with(&self, aggregator: &ChatSummaryAggregator) -> MessageReconciler {
        let reconciler = MessageReconciler::new(&self.ctx, aggregator.sink());
        reconciler.open(&self.chat).await.unwrap();
        reconciler
    }

    pub async fn open(&self) -> MessageReconciler {
        let reconciler = self.reconciler();
        reconciler.open(&self.chat).await.unwrap();
        reconciler
    }

    /// Seed the chat with Bob's messages `(id, sent_at, text)` and point the
    /// summary at the latest one.
    pub async fn seed(&self, messages: &[(&str, i64, &str)]) {
        let list: Vec<Message> = messages
            .iter()
            .map(|(id, at, text)| from_bob(id, *at, text))
            .collect();
        let latest = list
            .iter()
            .max_by_key(|m| m.sent_at)
            .and_then(|m| m.to_last_message(IMAGE_PREVIEW_TEXT));
        self.backend.seed_messages(&self.chat, list);
        self.backend
            .update_chat_summary(&self.chat, latest.as_ref())
            .await
            .unwrap();
    }
}

pub fn from_bob(id: &str, at: i64, text: &str) -> Message {
    let mut m = Message::outgoing_text(UserId::new("bob"), "Bob", text, at, None);
    m.id = MessageId::from(id);
    m.delivery = Default::default();
    m
}

// ---------------------------------------------------------------------------
// Slow backend
// ---------------------------------------------------------------------------

/// Latencies the engine's backend adds to selected calls. Zero means none.
#[derive(Debug, Default)]
pub struct Delays {
    fetch_ms: AtomicU64,
    update_ms: AtomicU64,
}

impl Delays {
    /// Hold a fetched message snapshot back this long before returning it.
    pub fn fetch(&self, delay: Duration) {
        self.fetch_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Wait this long before applying an edit.
    pub fn update(&self, delay: Duration) {
        self.update_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn wait(slot: &AtomicU64) {
        let ms = slot.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// The in-memory backend as the engine sees it, with [`Delays`] applied.
struct Delayed {
    inner: MemoryBackend,
    delays: Arc<Delays>,
}

#[async_trait]
impl ChatBackend for Delayed {
    async fn fetch_initial_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let snapshot = self.inner.fetch_initial_messages(chat_id).await;
        Delays::wait(&self.delays.fetch_ms).await;
        snapshot
    }

    async fn subscribe_message_events(
        &self,
        chat_id: &ChatId,
    ) -> Result<EventStream<MessageEvent>> {
        self.inner.subscribe_message_events(chat_id).await
    }

    async fn persist_message(&self, chat_id: &ChatId, message: &Message) -> Result<()> {
        self.inner.persist_message(chat_id, message).await
    }

    async fn update_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        new_text: &str,
    ) -> Result<()> {
        Delays::wait(&self.delays.update_ms).await;
        self.inner.update_message(chat_id, message_id, new_text).await
    }

    async fn delete_message(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<()> {
        self.inner.delete_message(chat_id, message_id).await
    }

    async fn ensure_chat(&self, chat_id: &ChatId, participants: [UserId; 2]) -> Result<ChatSummary> {
        self.inner.ensure_chat(chat_id, participants).await
    }

    async fn remove_chat_membership(&self, user_id: &UserId, chat_id: &ChatId) -> Result<()> {
        self.inner.remove_chat_membership(user_id, chat_id).await
    }

    async fn fetch_user_chats(&self, user_id: &UserId) -> Result<Vec<ChatSummary>> {
        self.inner.fetch_user_chats(user_id).await
    }

    async fn subscribe_chat_events(&self, user_id: &UserId) -> Result<EventStream<ChatSignal>> {
        self.inner.subscribe_chat_events(user_id).await
    }

    async fn update_chat_summary(
        &self,
        chat_id: &ChatId,
        last: Option<&LastMessage>,
    ) -> Result<()> {
        self.inner.update_chat_summary(chat_id, last).await
    }

    async fn upload_blob(&self, bytes: Bytes, destination_key: &str) -> Result<ImageRef> {
        self.inner.upload_blob(bytes, destination_key).await
    }

    async fn observe_presence(&self, user_id: &UserId) -> Result<EventStream<Option<Presence>>> {
        self.inner.observe_presence(user_id).await
    }

    async fn set_presence(&self, user_id: &UserId, presence: Presence) -> Result<()> {
        self.inner.set_presence(user_id, presence).await
    }
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.0.clone()).collect()
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a moment to drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
