//! The [`ChatClient`] facade.
//!
//! One client serves one signed-in user at a time. It owns a single
//! [`MessageReconciler`] for the conversation on screen, the user's
//! [`ChatSummaryAggregator`] and a [`PresenceTracker`] for the open chat's
//! peer. The reconciler reports summary changes straight to the aggregator
//! so the chat list moves before the backend echoes them back.

use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{Local, TimeZone};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use parley_shared::{
    display_status, ChatId, ChatSummary, Message, MessageId, Presence, PresenceStatus, Result,
    UserId,
};
use parley_sync::{
    ChatSummaryAggregator, Composer, CurrentUser, MessageReconciler, PresenceTracker,
    SyncContext, SyncEvent,
};

use crate::state::ClientState;

pub struct ChatClient {
    ctx: SyncContext,
    chat_list: ChatSummaryAggregator,
    conversation: MessageReconciler,
    presence: PresenceTracker,
    state: Mutex<ClientState>,
}

impl ChatClient {
    pub fn new(ctx: SyncContext) -> Self {
        let chat_list = ChatSummaryAggregator::new(&ctx);
        let conversation = MessageReconciler::new(&ctx, chat_list.sink());
        let presence = PresenceTracker::new(&ctx);
        Self {
            ctx,
            chat_list,
            conversation,
            presence,
            state: Mutex::new(ClientState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.events.subscribe()
    }

    pub fn conversation(&self) -> &MessageReconciler {
        &self.conversation
    }

    pub fn chat_list(&self) -> &ChatSummaryAggregator {
        &self.chat_list
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn snapshot(&self) -> ClientState {
        self.state().clone()
    }

    // -- Session -----------------------------------------------------------

    /// Sign `user` in, publish them as online and start their chat list.
    /// Anything left from a previous user is torn down first.
    pub async fn sign_in(&self, user: CurrentUser) -> Result<()> {
        if self.ctx.session.current_user().is_some() {
            self.sign_out().await;
        }

        let user_id = user.id.clone();
        self.ctx.session.sign_in(user);
        self.publish_presence(&user_id, Presence::online(self.ctx.clock.now()))
            .await;

        self.chat_list.start().await?;
        self.state().chat_list_started = true;
        Ok(())
    }

    /// Tear down every feed, publish the user as offline and clear the
    /// session. Returns the user that was signed in.
    pub async fn sign_out(&self) -> Option<CurrentUser> {
        self.shutdown().await;
        let user = self.ctx.session.sign_out()?;
        self.publish_presence(&user.id, Presence::offline_since(self.ctx.clock.now()))
            .await;
        Some(user)
    }

    async fn publish_presence(&self, user_id: &UserId, presence: Presence) {
        if let Err(e) = self.ctx.backend.set_presence(user_id, presence).await {
            warn!(user = %user_id, online = presence.is_online, error = %e, "Failed to publish presence");
        }
    }

    /// Stop the chat list, close the open chat and drop presence watchers.
    /// Uploads already in flight run to completion.
    pub async fn shutdown(&self) {
        self.close_chat();
        self.presence.stop_all();
        self.chat_list.stop().await;
        self.state().chat_list_started = false;
    }

    // -- Chats -------------------------------------------------------------

    /// The chat id shared by the signed-in user and `peer`.
    pub fn chat_id_with(&self, peer: &UserId) -> Result<ChatId> {
        let me = self.ctx.session.require_user()?;
        Ok(ChatId::derive_with(
            &me.id,
            peer,
            &self.ctx.config.chat_id_separator,
        ))
    }

    /// Open the conversation with `peer`, creating the chat on first use.
    /// Any previously open chat is closed.
    pub async fn open_chat(&self, peer: &UserId) -> Result<ChatId> {
        let me = self.ctx.session.require_user()?;
        let chat_id = self.chat_id_with(peer)?;

        let summary = self
            .ctx
            .backend
            .ensure_chat(&chat_id, [me.id.clone(), peer.clone()])
            .await?;
        self.chat_list.record_created(summary);

        self.conversation.open(&chat_id).await?;
        let previous_peer = self.state().open(chat_id.clone(), peer.clone());
        if let Some(previous) = previous_peer.filter(|p| p != peer) {
            self.presence.stop(&previous);
        }

        if let Err(e) = self.presence.observe(peer).await {
            warn!(peer = %peer, error = %e, "Presence unavailable for chat peer");
        }

        info!(chat = %chat_id, peer = %peer, "Chat opened");
        Ok(chat_id)
    }

    /// Close the open chat. Returns whether one was open.
    pub fn close_chat(&self) -> bool {
        let Some((chat_id, peer)) = self.state().close() else {
            return false;
        };
        self.conversation.close(&chat_id);
        self.presence.stop(&peer);
        debug!(chat = %chat_id, "Chat closed");
        true
    }

    /// Leave the chat with `peer`. The chat stays available to the peer.
    pub async fn remove_chat(&self, peer: &UserId) -> Result<()> {
        let me = self.ctx.session.require_user()?;
        let chat_id = self.chat_id_with(peer)?;

        self.ctx
            .backend
            .remove_chat_membership(&me.id, &chat_id)
            .await?;

        if self.state().is_open(&chat_id) {
            self.close_chat();
        }
        self.chat_list.record_removed(&chat_id);
        info!(chat = %chat_id, "Chat removed");
        Ok(())
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.chat_list.chats()
    }

    // -- Conversation --------------------------------------------------------

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    /// Submit the composer: an edit when editing, otherwise a send that
    /// carries the pending reply target. Blank text leaves the composer
    /// untouched.
    pub async fn submit(&self, text: &str) -> Result<Option<MessageId>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        match self.conversation.take_composer() {
            Composer::Editing(id) => {
                self.conversation.edit(&id, text).await?;
                Ok(Some(id))
            }
            Composer::Replying(id) => self.conversation.send_text(text, Some(id)).await,
            Composer::Idle => self.conversation.send_text(text, None).await,
        }
    }

    pub async fn send_image(&self, bytes: Bytes, caption: Option<String>) -> Result<MessageId> {
        self.conversation.send_image(bytes, caption).await
    }

    // -- Presence ------------------------------------------------------------

    /// Display status of an observed peer, in the local time zone.
    pub fn peer_status(&self, peer: &UserId) -> Option<PresenceStatus> {
        let presence = self.presence.current(peer)?;
        let now = Local.timestamp_opt(self.ctx.clock.now(), 0).single()?;
        Some(display_status(&presence, &now))
    }
}
