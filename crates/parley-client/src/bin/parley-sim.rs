//! # parley-sim
//!
//! Runs two clients against an in-memory backend and plays a short
//! conversation through the sync engine: sending, replying, an image
//! upload, an edit and a delete. Engine events for the first client are
//! printed as JSON lines.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::info;

use parley_client::events::spawn_event_bridge;
use parley_client::{init_logging, ChatClient};
use parley_shared::{ChatBackend, Clock, SystemClock};
use parley_store::MemoryBackend;
use parley_sync::{CurrentUser, Session, SyncConfig, SyncContext};

fn client_for(backend: &MemoryBackend, config: &SyncConfig) -> ChatClient {
    let backend: Arc<dyn ChatBackend> = Arc::new(backend.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ChatClient::new(SyncContext::new(
        backend,
        Session::anonymous(),
        clock,
        config.clone(),
    ))
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Logging and configuration
    // -----------------------------------------------------------------------
    init_logging();
    let config = SyncConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Backend and clients
    // -----------------------------------------------------------------------
    let backend = MemoryBackend::new();
    let alice = client_for(&backend, &config);
    let bob = client_for(&backend, &config);

    let (line_tx, mut line_rx) = mpsc::channel::<String>(config.event_buffer);
    let bridge = spawn_event_bridge(alice.subscribe(), line_tx);
    let printer = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            println!("{line}");
        }
    });

    alice.sign_in(CurrentUser::new("alice", "Alice")).await?;
    bob.sign_in(CurrentUser::new("bob", "Bob")).await?;
    let alice_id = alice.context().session.require_user()?.id;
    let bob_id = bob.context().session.require_user()?.id;

    // -----------------------------------------------------------------------
    // 3. Conversation
    // -----------------------------------------------------------------------
    let chat_id = alice.open_chat(&bob_id).await?;
    bob.open_chat(&alice_id).await?;

    let hello = alice
        .submit("Hi Bob!")
        .await?
        .context("greeting was blank")?;
    pause().await;

    bob.conversation().start_reply(&hello)?;
    bob.submit("Hey Alice, how are you?").await?;
    pause().await;

    let photo = alice
        .send_image(Bytes::from_static(b"\xff\xd8\xff\xe0 sim"), Some("Holiday".into()))
        .await?;
    pause().await;

    alice.conversation().start_edit(&hello)?;
    alice.submit("Hi Bob! (edited)").await?;
    pause().await;

    alice.conversation().delete(&photo).await?;
    pause().await;

    // -----------------------------------------------------------------------
    // 4. Report
    // -----------------------------------------------------------------------
    for message in alice.messages() {
        info!(
            id = %message.id,
            from = %message.sender_name,
            text = %message.text,
            edited = message.is_edited,
            "Timeline entry"
        );
    }
    for chat in alice.chats() {
        info!(
            chat = %chat.chat_id,
            last = ?chat.last_message_text,
            at = ?chat.last_message_timestamp,
            "Chat list entry"
        );
    }
    if let Some(status) = alice.peer_status(&bob_id) {
        info!(peer = %bob_id, %status, "Peer presence");
    }

    // -----------------------------------------------------------------------
    // 5. Shutdown
    // -----------------------------------------------------------------------
    bob.sign_out().await;
    pause().await;
    if let Some(status) = alice.peer_status(&bob_id) {
        info!(peer = %bob_id, %status, "Peer presence after sign-out");
    }
    alice.sign_out().await;

    pause().await;
    bridge.abort();
    printer.await.context("printer task panicked")?;

    info!(chat = %chat_id, "Simulation finished");
    Ok(())
}
