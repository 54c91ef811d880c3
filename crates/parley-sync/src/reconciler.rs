//! Message reconciliation for the open chat.
//!
//! The reconciler owns the in-memory view of exactly one open chat. Local
//! intents are applied to that view right away (send) or after the backend
//! confirms them (edit, delete). A listener task folds the chat's realtime
//! events into the same view. Intents and remote events interleave freely;
//! the [`Timeline`] merges are idempotent, so neither side needs to wait for
//! the other.
//!
//! Image sends run as a separate task: upload, persist the finalized message,
//! then update the summary. That task outlives [`MessageReconciler::close`],
//! so an image the user already sees still lands after they navigate away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::{
    ChatBackend, ChatId, Clock, DeliveryState, Message, MessageEvent, MessageId, MessageKind,
    Result, Subscription, SyncError,
};

use crate::events::{EventBus, SyncEvent};
use crate::last_message::{LastMessageInvariant, SummarySink};
use crate::session::{Session, SyncContext};
use crate::timeline::{Merge, Timeline};
use crate::upload::{UploadJob, UploadPipeline};

// ---------------------------------------------------------------------------
// Public state types
// ---------------------------------------------------------------------------

/// Health of the open chat's realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Live,
    /// The feed dropped; the view may miss remote changes until a resync.
    Degraded,
}

/// Composer intent. Replying and editing exclude each other.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "message_id", rename_all = "lowercase")]
pub enum Composer {
    #[default]
    Idle,
    Replying(MessageId),
    Editing(MessageId),
}

impl Composer {
    fn targets(&self, id: &MessageId) -> bool {
        match self {
            Composer::Replying(target) | Composer::Editing(target) => target == id,
            Composer::Idle => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct OpenChat {
    chat_id: ChatId,
    /// Distinguishes this open (or resubscription) from earlier ones, so a
    /// listener left over from them cannot touch the view.
    epoch: u64,
    timeline: Timeline,
    composer: Composer,
    status: SyncStatus,
    subscription: Option<Subscription>,
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    session: Session,
    clock: Arc<dyn Clock>,
    events: EventBus,
    uploads: UploadPipeline,
    invariant: LastMessageInvariant,
    state: Mutex<Option<OpenChat>>,
    epochs: AtomicU64,
}

/// Reconciles the open chat's optimistic local view with its remote feed.
///
/// Cloning is cheap; clones drive the same chat.
#[derive(Clone)]
pub struct MessageReconciler {
    inner: Arc<Inner>,
}

impl MessageReconciler {
    /// Create a reconciler. `summaries` receives a completion signal after
    /// each confirmed operation that moves a chat's last message.
    pub fn new(ctx: &SyncContext, summaries: SummarySink) -> Self {
        let uploads = UploadPipeline::new(
            Arc::clone(&ctx.backend),
            ctx.config.upload_root.clone(),
            ctx.config.max_image_bytes,
        );
        let invariant = LastMessageInvariant::new(
            Arc::clone(&ctx.backend),
            summaries,
            ctx.config.image_preview.clone(),
        );
        Self {
            inner: Arc::new(Inner {
                backend: Arc::clone(&ctx.backend),
                session: ctx.session.clone(),
                clock: Arc::clone(&ctx.clock),
                events: ctx.events.clone(),
                uploads,
                invariant,
                state: Mutex::new(None),
                epochs: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, Option<OpenChat>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the open chat if it is `chat_id`.
    fn with_chat<R>(&self, chat_id: &ChatId, f: impl FnOnce(&mut OpenChat) -> R) -> Option<R> {
        let mut state = self.state();
        state.as_mut().filter(|open| &open.chat_id == chat_id).map(f)
    }

    fn open_chat_id(&self) -> Result<ChatId> {
        self.state()
            .as_ref()
            .map(|open| open.chat_id.clone())
            .ok_or_else(|| SyncError::NotFound("no open chat".into()))
    }

    /// The message `id` in the open chat, with the chat id.
    fn target(&self, id: &MessageId) -> Result<(ChatId, Message)> {
        let state = self.state();
        let open = state
            .as_ref()
            .ok_or_else(|| SyncError::NotFound("no open chat".into()))?;
        let message = open
            .timeline
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("message {id}")))?;
        Ok((open.chat_id.clone(), message))
    }

    fn next_epoch(&self) -> u64 {
        self.inner.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn changed(&self, chat_id: &ChatId) {
        self.inner.events.emit(SyncEvent::TimelineChanged {
            chat_id: chat_id.clone(),
        });
    }

    /// Log and surface a failure the user should see; hand the error back.
    fn report(&self, chat_id: &ChatId, message_id: Option<&MessageId>, error: SyncError) -> SyncError {
        if error.is_user_visible() {
            warn!(chat = %chat_id, msg = ?message_id, error = %error, "Operation failed");
            self.inner.events.emit(SyncEvent::OperationFailed {
                chat_id: Some(chat_id.clone()),
                message_id: message_id.cloned(),
                error: error.clone(),
            });
        } else {
            debug!(chat = %chat_id, msg = ?message_id, error = %error, "Operation rejected");
        }
        error
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load `chat_id` and start following its realtime feed. Any other open
    /// chat is closed first.
    pub async fn open(&self, chat_id: &ChatId) -> Result<()> {
        if let Some(previous) = self.state().take() {
            info!(chat = %previous.chat_id, "Closing chat to open another");
        }

        // Subscribe before fetching so nothing written in between is missed;
        // events already in the snapshot merge as no-ops.
        let stream = self
            .inner
            .backend
            .subscribe_message_events(chat_id)
            .await
            .map_err(|e| self.report(chat_id, None, e))?;
        let snapshot = self
            .inner
            .backend
            .fetch_initial_messages(chat_id)
            .await
            .map_err(|e| self.report(chat_id, None, e))?;

        let epoch = self.next_epoch();
        let timeline = Timeline::from_snapshot(snapshot);
        let count = timeline.len();
        *self.state() = Some(OpenChat {
            chat_id: chat_id.clone(),
            epoch,
            timeline,
            composer: Composer::Idle,
            status: SyncStatus::Live,
            subscription: Some(stream.subscription),
        });
        self.spawn_listener(chat_id.clone(), epoch, stream.events);

        info!(chat = %chat_id, messages = count, "Chat opened");
        self.changed(chat_id);
        Ok(())
    }

    /// Detach the listener and drop the view of `chat_id`. Uploads already
    /// running keep going. Returns whether the chat was open.
    pub fn close(&self, chat_id: &ChatId) -> bool {
        let closed = {
            let mut state = self.state();
            match state.as_ref() {
                Some(open) if &open.chat_id == chat_id => state.take(),
                _ => None,
            }
        };
        match closed {
            Some(_) => {
                info!(
                    chat = %chat_id,
                    uploads = self.inner.uploads.in_flight(),
                    "Chat closed"
                );
                true
            }
            None => false,
        }
    }

    fn spawn_listener(&self, chat_id: ChatId, epoch: u64, events: mpsc::Receiver<MessageEvent>) {
        tokio::spawn(self.clone().listen(chat_id, epoch, events));
    }

    async fn listen(self, chat_id: ChatId, epoch: u64, mut events: mpsc::Receiver<MessageEvent>) {
        while let Some(event) = events.recv().await {
            if !self.apply_remote(&chat_id, epoch, event) {
                return;
            }
        }

        // The feed ended on its own: mark the chat degraded if it is still
        // the one this listener was started for.
        let degraded = {
            let mut state = self.state();
            match state.as_mut() {
                Some(open) if open.epoch == epoch => {
                    open.status = SyncStatus::Degraded;
                    open.subscription = None;
                    true
                }
                _ => false,
            }
        };
        if degraded {
            warn!(chat = %chat_id, "Message feed disconnected");
            self.inner.events.emit(SyncEvent::SyncDegraded { chat_id });
        }
    }

    /// Fold one remote event. Returns false once the listener is stale.
    fn apply_remote(&self, chat_id: &ChatId, epoch: u64, event: MessageEvent) -> bool {
        let id = event.message_id().clone();
        let merge = {
            let mut state = self.state();
            let Some(open) = state.as_mut().filter(|open| open.epoch == epoch) else {
                return false;
            };
            let merge = match event {
                MessageEvent::Added(message) => open.timeline.apply_added(message),
                MessageEvent::Updated(message) => open.timeline.apply_updated(message),
                MessageEvent::Deleted(id) => open.timeline.apply_deleted(&id),
            };
            if merge == Merge::Removed && open.composer.targets(&id) {
                open.composer = Composer::Idle;
            }
            merge
        };

        debug!(chat = %chat_id, msg = %id, ?merge, "Remote event");
        if merge != Merge::Ignored {
            self.changed(chat_id);
        }
        true
    }

    /// Refetch the chat, fold the snapshot in, restore `sent_at` order and,
    /// if the feed had dropped, subscribe again.
    pub async fn resync(&self) -> Result<()> {
        let chat_id = self.open_chat_id()?;
        let degraded = self.status() == Some(SyncStatus::Degraded);

        let stream = if degraded {
            let stream = self
                .inner
                .backend
                .subscribe_message_events(&chat_id)
                .await
                .map_err(|e| self.report(&chat_id, None, e))?;
            Some(stream)
        } else {
            None
        };
        let known = self
            .with_chat(&chat_id, |open| open.timeline.persisted_ids())
            .unwrap_or_default();
        let snapshot = self
            .inner
            .backend
            .fetch_initial_messages(&chat_id)
            .await
            .map_err(|e| self.report(&chat_id, None, e))?;

        let epoch = self.next_epoch();
        let listener = self
            .with_chat(&chat_id, |open| {
                open.timeline.merge_snapshot(snapshot, &known);
                stream.map(|stream| {
                    open.epoch = epoch;
                    open.status = SyncStatus::Live;
                    open.subscription = Some(stream.subscription);
                    stream.events
                })
            })
            .ok_or_else(|| SyncError::NotFound(format!("chat {chat_id} closed during resync")))?;

        let restored = listener.is_some();
        if let Some(events) = listener {
            self.spawn_listener(chat_id.clone(), epoch, events);
            self.inner.events.emit(SyncEvent::SyncRestored {
                chat_id: chat_id.clone(),
            });
        }
        info!(chat = %chat_id, restored, "Chat resynced");
        self.changed(&chat_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn chat_id(&self) -> Option<ChatId> {
        self.state().as_ref().map(|open| open.chat_id.clone())
    }

    /// The open chat's messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.state()
            .as_ref()
            .map(|open| open.timeline.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.state()
            .as_ref()
            .and_then(|open| open.timeline.get(id).cloned())
    }

    pub fn status(&self) -> Option<SyncStatus> {
        self.state().as_ref().map(|open| open.status)
    }

    pub fn composer(&self) -> Composer {
        self.state()
            .as_ref()
            .map(|open| open.composer.clone())
            .unwrap_or_default()
    }

    pub fn uploads(&self) -> &UploadPipeline {
        &self.inner.uploads
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send a text message. Blank text does nothing and returns `None`.
    ///
    /// The message shows up at once as pending. If the backend rejects it,
    /// it stays in the view as failed until [`retry`](Self::retry) or
    /// [`discard`](Self::discard).
    pub async fn send_text(&self, text: &str, reply_to: Option<MessageId>) -> Result<Option<MessageId>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Blank message not sent");
            return Ok(None);
        }
        let user = self.inner.session.require_user()?;
        let chat_id = self.open_chat_id()?;

        let message = Message::outgoing_text(
            user.id,
            user.display_name,
            text,
            self.inner.clock.now(),
            reply_to,
        );
        let id = message.id.clone();
        self.with_chat(&chat_id, |open| open.timeline.push_local(message.clone()));
        self.changed(&chat_id);
        debug!(chat = %chat_id, msg = %id, "Text message queued");

        self.persist_text(&chat_id, message).await?;
        Ok(Some(id))
    }

    async fn persist_text(&self, chat_id: &ChatId, mut message: Message) -> Result<()> {
        let id = message.id.clone();
        match self.inner.backend.persist_message(chat_id, &message).await {
            Ok(()) => {
                let latest = self.with_chat(chat_id, |open| {
                    if let Some(entry) = open.timeline.get_mut(&id) {
                        entry.delivery = DeliveryState::Sent;
                    }
                    open.timeline.latest_persisted().cloned()
                });
                self.changed(chat_id);
                info!(chat = %chat_id, msg = %id, "Message sent");

                message.delivery = DeliveryState::Sent;
                let latest = match latest {
                    Some(latest) => latest,
                    None => self.backend_latest(chat_id, None).await,
                };
                if let Err(e) = self
                    .inner
                    .invariant
                    .after_send(chat_id, latest.as_ref(), &message)
                    .await
                {
                    self.report(chat_id, Some(&id), e);
                }
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.with_chat(chat_id, |open| {
                    if let Some(entry) = open.timeline.get_mut(&id) {
                        entry.delivery = DeliveryState::Failed { reason };
                    }
                });
                self.changed(chat_id);
                Err(self.report(chat_id, Some(&id), e))
            }
        }
    }

    /// Send an image. The placeholder, carrying the raw bytes, shows up at
    /// once; the upload and the final write continue in the background.
    pub async fn send_image(&self, bytes: Bytes, caption: Option<String>) -> Result<MessageId> {
        let user = self.inner.session.require_user()?;
        let chat_id = self.open_chat_id()?;
        self.inner.uploads.check(&bytes)?;

        let placeholder = Message::outgoing_image(
            user.id,
            user.display_name,
            caption.unwrap_or_default().trim(),
            bytes,
            self.inner.clock.now(),
            None,
        );
        let id = placeholder.id.clone();
        self.with_chat(&chat_id, |open| open.timeline.push_local(placeholder.clone()));
        self.changed(&chat_id);
        debug!(chat = %chat_id, msg = %id, "Image message queued");

        self.start_upload(chat_id, placeholder);
        Ok(id)
    }

    fn start_upload(&self, chat_id: ChatId, placeholder: Message) {
        let bytes = placeholder.local_image_bytes.clone().unwrap_or_default();
        match self.inner.uploads.upload(&chat_id, &placeholder.id, bytes) {
            Ok(job) => {
                tokio::spawn(self.clone().finish_image(chat_id, placeholder, job));
            }
            Err(e) => {
                self.mark_upload_failed(&chat_id, &placeholder.id, &e);
                self.report(&chat_id, Some(&placeholder.id), e);
            }
        }
    }

    async fn finish_image(self, chat_id: ChatId, placeholder: Message, job: UploadJob) {
        let id = placeholder.id.clone();
        let image_ref = match job.finish().await {
            None => {
                debug!(chat = %chat_id, msg = %id, "Upload superseded");
                return;
            }
            Some(Err(e)) => {
                self.mark_upload_failed(&chat_id, &id, &e);
                self.report(&chat_id, Some(&id), e);
                return;
            }
            Some(Ok(image_ref)) => image_ref,
        };

        let finalized = placeholder.finalized(image_ref);
        if let Err(e) = self.inner.backend.persist_message(&chat_id, &finalized).await {
            self.mark_upload_failed(&chat_id, &id, &e);
            self.report(&chat_id, Some(&id), e);
            return;
        }

        // Same id and sent_at: the entry is replaced where it stands.
        let latest = match self.with_chat(&chat_id, |open| {
            if let Some(entry) = open.timeline.get_mut(&id) {
                *entry = finalized.clone();
            }
            open.timeline.latest_persisted().cloned()
        }) {
            Some(latest) => {
                self.changed(&chat_id);
                latest
            }
            None => self.backend_latest(&chat_id, None).await,
        };
        info!(chat = %chat_id, msg = %id, "Image message sent");

        if let Err(e) = self
            .inner
            .invariant
            .after_send(&chat_id, latest.as_ref(), &finalized)
            .await
        {
            self.report(&chat_id, Some(&id), e);
        }
    }

    fn mark_upload_failed(&self, chat_id: &ChatId, id: &MessageId, error: &SyncError) {
        let reason = error.to_string();
        let marked = self
            .with_chat(chat_id, |open| match open.timeline.get_mut(id) {
                Some(entry) => {
                    entry.is_uploading = false;
                    entry.upload_failed = true;
                    entry.delivery = DeliveryState::Failed { reason };
                    true
                }
                None => false,
            })
            .unwrap_or(false);
        if marked {
            self.changed(chat_id);
        }
    }

    /// Retry a failed send. Text is persisted again; an image goes back to
    /// uploading with the bytes it kept.
    pub async fn retry(&self, id: &MessageId) -> Result<()> {
        self.inner.session.require_user()?;
        let (chat_id, target) = self.target(id)?;
        if !target.is_failed() {
            return Err(SyncError::ValidationRejected(format!("message {id} has not failed")));
        }

        match target.kind {
            MessageKind::Text => {
                let pending = self
                    .with_chat(&chat_id, |open| {
                        open.timeline.get_mut(id).map(|entry| {
                            entry.delivery = DeliveryState::Pending;
                            entry.clone()
                        })
                    })
                    .flatten()
                    .ok_or_else(|| SyncError::NotFound(format!("message {id}")))?;
                self.changed(&chat_id);
                info!(chat = %chat_id, msg = %id, "Retrying message");
                self.persist_text(&chat_id, pending).await
            }
            MessageKind::Image => {
                if target.local_image_bytes.is_none() {
                    return Err(SyncError::ValidationRejected(format!(
                        "image bytes of {id} are gone"
                    )));
                }
                let placeholder = self
                    .with_chat(&chat_id, |open| {
                        open.timeline.get_mut(id).map(|entry| {
                            entry.is_uploading = true;
                            entry.upload_failed = false;
                            entry.delivery = DeliveryState::Pending;
                            entry.clone()
                        })
                    })
                    .flatten()
                    .ok_or_else(|| SyncError::NotFound(format!("message {id}")))?;
                self.changed(&chat_id);
                info!(chat = %chat_id, msg = %id, "Retrying image upload");
                self.start_upload(chat_id, placeholder);
                Ok(())
            }
        }
    }

    /// Remove a failed or still-uploading entry that never reached the
    /// backend, cancelling its upload.
    pub fn discard(&self, id: &MessageId) -> Result<()> {
        let (chat_id, target) = self.target(id)?;
        if !(target.is_failed() || target.is_uploading) {
            return Err(SyncError::ValidationRejected(format!(
                "message {id} is not a failed or uploading message"
            )));
        }
        self.inner.uploads.cancel(&chat_id, id);
        self.with_chat(&chat_id, |open| {
            open.timeline.remove(id);
            if open.composer.targets(id) {
                open.composer = Composer::Idle;
            }
        });
        info!(chat = %chat_id, msg = %id, "Message discarded");
        self.changed(&chat_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Editing and deleting
    // -----------------------------------------------------------------------

    /// Edit a delivered text message. The view changes only after the
    /// backend confirms; blank text does nothing.
    pub async fn edit(&self, id: &MessageId, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            debug!(msg = %id, "Blank edit ignored");
            return Ok(());
        }
        self.inner.session.require_user()?;
        let (chat_id, target) = self.target(id)?;
        if !target.is_text() {
            return Err(SyncError::ValidationRejected("only text messages can be edited".into()));
        }
        if !target.is_persisted() {
            return Err(SyncError::ValidationRejected(format!("message {id} is not delivered")));
        }
        if target.text == new_text {
            return Ok(());
        }

        match self.inner.backend.update_message(&chat_id, id, new_text).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(chat = %chat_id, msg = %id, "Edited message already gone");
                return Ok(());
            }
            Err(e) => return Err(self.report(&chat_id, Some(id), e)),
        }

        let mut edited = target;
        edited.text = new_text.to_string();
        edited.is_edited = true;
        // Judged after the call: a newer send may have landed meanwhile.
        let latest = match self.with_chat(&chat_id, |open| {
            if let Some(entry) = open.timeline.get_mut(id) {
                entry.text = edited.text.clone();
                entry.is_edited = true;
            }
            if open.composer == Composer::Editing(id.clone()) {
                open.composer = Composer::Idle;
            }
            open.timeline.latest_persisted().cloned()
        }) {
            Some(latest) => {
                self.changed(&chat_id);
                latest
            }
            None => self.backend_latest(&chat_id, None).await,
        };
        info!(chat = %chat_id, msg = %id, "Message edited");

        if let Err(e) = self
            .inner
            .invariant
            .after_edit(&chat_id, latest.as_ref(), &edited)
            .await
        {
            self.report(&chat_id, Some(id), e);
        }
        Ok(())
    }

    /// Delete a delivered message. It leaves the view only after the backend
    /// confirms; a rejected delete leaves it in place. A failed message is
    /// discarded locally instead.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        self.inner.session.require_user()?;
        let (chat_id, target) = self.target(id)?;
        if target.is_failed() {
            return self.discard(id);
        }
        if !target.is_persisted() {
            return Err(SyncError::ValidationRejected(format!("message {id} is not delivered")));
        }
        // Taken before the call: the remote echo may remove the message
        // from the view before the call returns.
        let latest_before = self
            .with_chat(&chat_id, |open| open.timeline.latest_persisted().cloned())
            .flatten();

        match self.inner.backend.delete_message(&chat_id, id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(chat = %chat_id, msg = %id, "Deleted message already gone");
            }
            Err(e) => return Err(self.report(&chat_id, Some(id), e)),
        }

        let remaining = match self.with_chat(&chat_id, |open| {
            open.timeline.forget(id);
            if open.composer.targets(id) {
                open.composer = Composer::Idle;
            }
            open.timeline.latest_persisted().cloned()
        }) {
            Some(remaining) => remaining,
            // Closed meanwhile: recompute from the backend's copy.
            None => self.backend_latest(&chat_id, Some(id)).await,
        };
        self.changed(&chat_id);
        info!(chat = %chat_id, msg = %id, "Message deleted");

        if let Err(e) = self
            .inner
            .invariant
            .after_delete(&chat_id, id, latest_before.as_ref(), remaining.as_ref())
            .await
        {
            self.report(&chat_id, Some(id), e);
        }
        Ok(())
    }

    /// Latest message of a chat that is no longer open, read from the
    /// backend's copy without `skip`.
    async fn backend_latest(&self, chat_id: &ChatId, skip: Option<&MessageId>) -> Option<Message> {
        match self.inner.backend.fetch_initial_messages(chat_id).await {
            Ok(messages) => {
                let remaining: Vec<Message> = messages
                    .into_iter()
                    .filter(|m| Some(&m.id) != skip)
                    .collect();
                crate::last_message::latest_persisted(&remaining).cloned()
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Could not refetch the latest message");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Composer
    // -----------------------------------------------------------------------

    /// Reply to `id`. Cancels an edit in progress.
    pub fn start_reply(&self, id: &MessageId) -> Result<()> {
        let (chat_id, _) = self.target(id)?;
        self.with_chat(&chat_id, |open| open.composer = Composer::Replying(id.clone()));
        Ok(())
    }

    pub fn cancel_reply(&self) {
        let mut state = self.state();
        if let Some(open) = state.as_mut() {
            if matches!(open.composer, Composer::Replying(_)) {
                open.composer = Composer::Idle;
            }
        }
    }

    /// Edit `id` from the composer. Cancels a reply in progress.
    pub fn start_edit(&self, id: &MessageId) -> Result<()> {
        let (chat_id, target) = self.target(id)?;
        if !target.is_text() || !target.is_persisted() {
            return Err(SyncError::ValidationRejected(format!("message {id} cannot be edited")));
        }
        self.with_chat(&chat_id, |open| open.composer = Composer::Editing(id.clone()));
        Ok(())
    }

    pub fn cancel_edit(&self) {
        let mut state = self.state();
        if let Some(open) = state.as_mut() {
            if matches!(open.composer, Composer::Editing(_)) {
                open.composer = Composer::Idle;
            }
        }
    }

    /// Take the composer intent, leaving it idle.
    pub fn take_composer(&self) -> Composer {
        self.state()
            .as_mut()
            .map(|open| std::mem::take(&mut open.composer))
            .unwrap_or_default()
    }
}
