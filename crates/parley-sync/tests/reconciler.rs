mod common;

use std::time::Duration;

use bytes::Bytes;

use parley_shared::{DeliveryState, MessageEvent, MessageId, SyncError};
use parley_store::Op;
use parley_sync::{Composer, CurrentUser, SyncConfig, SyncEvent, SyncStatus};

use common::{eventually, from_bob, ids, settle, Harness};

#[tokio::test]
async fn open_loads_snapshot_in_order() {
    let h = Harness::new().await;
    h.seed(&[("c", 30, "3"), ("a", 10, "1"), ("b", 20, "2")]).await;
    let chat = h.open().await;

    assert_eq!(chat.chat_id(), Some(h.chat.clone()));
    assert_eq!(ids(&chat.messages()), vec!["a", "b", "c"]);
    assert_eq!(chat.status(), Some(SyncStatus::Live));
    assert_eq!(h.backend.message_listener_count(&h.chat), 1);
}

#[tokio::test]
async fn blank_text_is_a_silent_no_op() {
    let h = Harness::new().await;
    let chat = h.open().await;

    assert_eq!(chat.send_text("   \n\t", None).await.unwrap(), None);
    assert!(chat.messages().is_empty());
    assert_eq!(h.backend.calls(Op::PersistMessage), 0);
}

#[tokio::test]
async fn signed_out_user_cannot_send() {
    let h = Harness::new().await;
    let chat = h.open().await;
    h.ctx.session.sign_out();

    let err = chat.send_text("hi", None).await.unwrap_err();
    assert_eq!(err, SyncError::NotAuthenticated);
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn failed_send_stays_visible_until_retried() {
    let h = Harness::new().await;
    let chat = h.open().await;
    let mut events = h.ctx.events.subscribe();

    h.backend
        .fail_next(Op::PersistMessage, SyncError::TransientIo("offline".into()));
    let err = chat.send_text("hello", None).await.unwrap_err();
    assert!(matches!(err, SyncError::TransientIo(_)));

    let failed = chat.messages().pop().unwrap();
    assert!(failed.is_failed());
    assert!(h.backend.messages(&h.chat).is_empty());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::OperationFailed { message_id, .. } = event {
            assert_eq!(message_id, Some(failed.id.clone()));
            saw_failure = true;
        }
    }
    assert!(saw_failure);

    chat.retry(&failed.id).await.unwrap();
    assert!(chat.message(&failed.id).unwrap().is_persisted());
    assert_eq!(h.backend.messages(&h.chat).len(), 1);
    assert_eq!(
        h.backend.chat(&h.chat).unwrap().last_message_text.as_deref(),
        Some("hello")
    );
}

#[tokio::test]
async fn discard_removes_failed_message() {
    let h = Harness::new().await;
    let chat = h.open().await;
    h.backend
        .fail_next(Op::PersistMessage, SyncError::TransientIo("offline".into()));
    let _ = chat.send_text("lost", None).await;
    let failed = chat.messages().pop().unwrap();

    chat.discard(&failed.id).unwrap();
    assert!(chat.messages().is_empty());

    let sent = chat.send_text("ok", None).await.unwrap().unwrap();
    let err = chat.discard(&sent).unwrap_err();
    assert!(matches!(err, SyncError::ValidationRejected(_)));
}

#[tokio::test]
async fn send_updates_summary_and_reply_target() {
    let h = Harness::new().await;
    h.seed(&[("q", 10, "question?")]).await;
    let chat = h.open().await;

    let id = chat
        .send_text("  answer  ", Some(MessageId::from("q")))
        .await
        .unwrap()
        .unwrap();
    let sent = chat.message(&id).unwrap();
    assert_eq!(sent.text, "answer");
    assert_eq!(sent.reply_to_id, Some(MessageId::from("q")));
    assert_eq!(sent.sent_at, Some(common::START));

    let summary = h.backend.chat(&h.chat).unwrap();
    assert_eq!(summary.last_message_text.as_deref(), Some("answer"));
    assert_eq!(summary.last_message_timestamp, Some(common::START));
}

#[tokio::test]
async fn editing_latest_message_rewrites_summary() {
    let h = Harness::new().await;
    h.seed(&[("m10", 10, "hi"), ("m20", 20, "bye")]).await;
    let chat = h.open().await;

    chat.edit(&MessageId::from("m20"), "see you").await.unwrap();
    assert_eq!(
        h.backend.chat(&h.chat).unwrap().last_message_text.as_deref(),
        Some("see you")
    );
}

#[tokio::test]
async fn edit_of_image_is_rejected_without_backend_call() {
    let h = Harness::new().await;
    let chat = h.open().await;
    let id = chat
        .send_image(Bytes::from_static(b"img"), Some("caption".into()))
        .await
        .unwrap();
    eventually("image sent", || {
        chat.message(&id).map(|m| m.is_persisted()).unwrap_or(false)
    })
    .await;

    let err = chat.edit(&id, "new caption").await.unwrap_err();
    assert!(matches!(err, SyncError::ValidationRejected(_)));
    assert_eq!(h.backend.calls(Op::UpdateMessage), 0);

    // blank edits never reach the backend either
    chat.edit(&id, "  ").await.unwrap();
    assert_eq!(h.backend.calls(Op::UpdateMessage), 0);
}

#[tokio::test]
async fn edit_of_remotely_deleted_message_resolves_quietly() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "hi")]).await;
    let chat = h.open().await;
    let mut events = h.ctx.events.subscribe();

    h.backend
        .fail_next(Op::UpdateMessage, SyncError::NotFound("message m1".into()));
    chat.edit(&MessageId::from("m1"), "changed").await.unwrap();

    assert_eq!(chat.message(&MessageId::from("m1")).unwrap().text, "hi");
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SyncEvent::OperationFailed { .. }));
    }
}

#[tokio::test]
async fn deleting_only_message_clears_summary() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "only")]).await;
    let chat = h.open().await;

    chat.delete(&MessageId::from("m1")).await.unwrap();

    let summary = h.backend.chat(&h.chat).unwrap();
    assert_eq!(summary.last_message_text, None);
    assert_eq!(summary.last_message_sender_id, None);
    assert_eq!(summary.last_message_timestamp, None);
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn delete_not_found_counts_as_deleted() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a"), ("m2", 20, "b")]).await;
    let chat = h.open().await;

    h.backend
        .fail_next(Op::DeleteMessage, SyncError::NotFound("message m2".into()));
    chat.delete(&MessageId::from("m2")).await.unwrap();
    assert_eq!(ids(&chat.messages()), vec!["m1"]);
    assert_eq!(h.backend.chat(&h.chat).unwrap().last_message_timestamp, Some(10));
}

#[tokio::test]
async fn deleted_ids_are_not_resurrected_by_late_echoes() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a")]).await;
    let chat = h.open().await;

    chat.delete(&MessageId::from("m1")).await.unwrap();
    h.backend
        .inject_message_event(&h.chat, MessageEvent::Added(from_bob("m1", 10, "a")));
    h.backend
        .inject_message_event(&h.chat, MessageEvent::Updated(from_bob("m1", 10, "b")));
    settle().await;

    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn remote_writer_changes_are_folded_in() {
    let h = Harness::new().await;
    let chat = h.open().await;

    h.clock.advance(5);
    h.backend.remote_send(&h.chat, from_bob("b1", 1_005, "hey"));
    eventually("remote add", || chat.messages().len() == 1).await;

    h.backend
        .remote_edit(&h.chat, &MessageId::from("b1"), "hey there")
        .unwrap();
    eventually("remote edit", || {
        chat.message(&MessageId::from("b1"))
            .map(|m| m.is_edited && m.text == "hey there")
            .unwrap_or(false)
    })
    .await;

    h.backend.remote_delete(&h.chat, &MessageId::from("b1")).unwrap();
    eventually("remote delete", || chat.messages().is_empty()).await;
}

#[tokio::test]
async fn update_before_add_is_an_implicit_add() {
    let h = Harness::new().await;
    let chat = h.open().await;

    let mut edited = from_bob("b1", 10, "edited");
    edited.is_edited = true;
    h.backend
        .inject_message_event(&h.chat, MessageEvent::Updated(edited));
    h.backend
        .inject_message_event(&h.chat, MessageEvent::Added(from_bob("b1", 10, "edited")));
    settle().await;

    assert_eq!(ids(&chat.messages()), vec!["b1"]);
}

#[tokio::test]
async fn close_detaches_listener_and_drops_state() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a")]).await;
    let chat = h.open().await;

    assert!(chat.close(&h.chat));
    assert!(!chat.close(&h.chat));
    assert_eq!(h.backend.message_listener_count(&h.chat), 0);
    assert!(chat.messages().is_empty());
    assert_eq!(chat.chat_id(), None);
}

#[tokio::test]
async fn opening_another_chat_leaves_no_state_behind() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a")]).await;
    let chat = h.open().await;
    chat.start_reply(&MessageId::from("m1")).unwrap();

    let other = parley_shared::ChatId::from("alice_carol");
    chat.open(&other).await.unwrap();

    assert_eq!(chat.chat_id(), Some(other));
    assert!(chat.messages().is_empty());
    assert_eq!(chat.composer(), Composer::Idle);
    assert_eq!(h.backend.message_listener_count(&h.chat), 0);

    // events for the old chat no longer reach the view
    h.backend.remote_send(&h.chat, from_bob("late", 20, "late"));
    settle().await;
    assert!(chat.messages().is_empty());
}

#[tokio::test]
async fn close_does_not_cancel_image_upload() {
    let h = Harness::new().await;
    h.backend.pause_uploads();
    let chat = h.open().await;

    let id = chat.send_image(Bytes::from_static(b"img"), None).await.unwrap();
    chat.close(&h.chat);
    assert_eq!(chat.uploads().in_flight(), 1);

    h.backend.resume_uploads();
    eventually("image persisted after close", || {
        h.backend
            .messages(&h.chat)
            .iter()
            .any(|m| m.id == id && m.image_ref.is_some())
    })
    .await;
    eventually("summary after close", || {
        h.backend
            .chat(&h.chat)
            .and_then(|c| c.last_message_text)
            .as_deref()
            == Some("Photo")
    })
    .await;
}

#[tokio::test]
async fn failed_upload_is_marked_and_retry_uploads_again() {
    let h = Harness::new().await;
    let chat = h.open().await;
    h.backend
        .fail_next(Op::UploadBlob, SyncError::UploadFailed("quota".into()));

    let id = chat.send_image(Bytes::from_static(b"img"), None).await.unwrap();
    eventually("upload failed", || {
        chat.message(&id).map(|m| m.upload_failed).unwrap_or(false)
    })
    .await;
    let failed = chat.message(&id).unwrap();
    assert!(!failed.is_uploading);
    assert!(failed.local_image_bytes.is_some());
    assert!(matches!(failed.delivery, DeliveryState::Failed { .. }));

    chat.retry(&id).await.unwrap();
    eventually("retried upload lands", || {
        chat.message(&id).map(|m| m.image_ref.is_some()).unwrap_or(false)
    })
    .await;
    assert_eq!(chat.messages().len(), 1);
    assert_eq!(h.backend.calls(Op::UploadBlob), 2);
}

#[tokio::test]
async fn discarding_uploading_image_cancels_job() {
    let h = Harness::new().await;
    h.backend.pause_uploads();
    let chat = h.open().await;

    let id = chat.send_image(Bytes::from_static(b"img"), None).await.unwrap();
    chat.discard(&id).unwrap();
    assert_eq!(chat.uploads().in_flight(), 0);

    h.backend.resume_uploads();
    settle().await;
    assert!(chat.messages().is_empty());
    assert!(h.backend.messages(&h.chat).is_empty());
}

#[tokio::test]
async fn oversized_image_is_rejected_locally() {
    let h = Harness::new().await;
    let chat = h.open().await;
    let too_big = Bytes::from(vec![0u8; h.ctx.config.max_image_bytes + 1]);

    let err = chat.send_image(too_big, None).await.unwrap_err();
    assert!(matches!(err, SyncError::ValidationRejected(_)));
    assert!(chat.messages().is_empty());
    assert_eq!(h.backend.calls(Op::UploadBlob), 0);
}

#[tokio::test]
async fn reply_and_edit_exclude_each_other() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a"), ("m2", 20, "b")]).await;
    let chat = h.open().await;
    let (m1, m2) = (MessageId::from("m1"), MessageId::from("m2"));

    chat.start_reply(&m1).unwrap();
    assert_eq!(chat.composer(), Composer::Replying(m1.clone()));
    chat.start_edit(&m2).unwrap();
    assert_eq!(chat.composer(), Composer::Editing(m2.clone()));
    chat.cancel_reply();
    assert_eq!(chat.composer(), Composer::Editing(m2.clone()));
    chat.start_reply(&m1).unwrap();
    assert_eq!(chat.composer(), Composer::Replying(m1));
    chat.cancel_reply();
    assert_eq!(chat.composer(), Composer::Idle);

    assert!(chat.start_reply(&MessageId::from("ghost")).is_err());
}

#[tokio::test]
async fn remote_delete_clears_composer_target() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a")]).await;
    let chat = h.open().await;
    chat.start_edit(&MessageId::from("m1")).unwrap();

    h.backend.remote_delete(&h.chat, &MessageId::from("m1")).unwrap();
    eventually("composer reset", || chat.composer() == Composer::Idle).await;
}

#[tokio::test]
async fn disconnect_degrades_and_resync_restores() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a"), ("m2", 20, "b")]).await;
    let chat = h.open().await;
    let mut events = h.ctx.events.subscribe();

    h.backend.disconnect_message_listeners(&h.chat);
    eventually("degraded", || chat.status() == Some(SyncStatus::Degraded)).await;

    // missed while disconnected
    h.backend.remote_delete(&h.chat, &MessageId::from("m1")).unwrap();
    h.backend.remote_send(&h.chat, from_bob("m3", 30, "c"));
    assert_eq!(ids(&chat.messages()), vec!["m1", "m2"]);

    chat.resync().await.unwrap();
    assert_eq!(chat.status(), Some(SyncStatus::Live));
    assert_eq!(ids(&chat.messages()), vec!["m2", "m3"]);
    assert_eq!(h.backend.message_listener_count(&h.chat), 1);

    h.backend.remote_send(&h.chat, from_bob("m4", 40, "d"));
    eventually("live again", || chat.messages().len() == 3).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&SyncEvent::SyncDegraded {
        chat_id: h.chat.clone()
    }));
    assert!(seen.contains(&SyncEvent::SyncRestored {
        chat_id: h.chat.clone()
    }));
}

#[tokio::test]
async fn second_session_user_sends_under_their_name() {
    let h = Harness::new().await;
    let chat = h.open().await;
    h.ctx.session.sign_in(CurrentUser::new("alice", "Alice B."));

    let id = chat.send_text("hi", None).await.unwrap().unwrap();
    assert_eq!(chat.message(&id).unwrap().sender_name, "Alice B.");
}

#[tokio::test]
async fn late_image_upload_does_not_overtake_newer_send() {
    let h = Harness::new().await;
    let list = h.aggregator();
    list.start().await.unwrap();
    let chat = h.open_with(&list).await;
    h.backend.pause_uploads();

    let image = chat.send_image(Bytes::from_static(b"img"), None).await.unwrap();
    h.clock.set(1_010);
    chat.send_text("newer text", None).await.unwrap();
    assert_eq!(h.backend.chat(&h.chat).unwrap().last_message_timestamp, Some(1_010));

    h.backend.resume_uploads();
    eventually("image finalized", || {
        chat.message(&image).map(|m| m.image_ref.is_some()).unwrap_or(false)
    })
    .await;
    settle().await;

    let summary = h.backend.chat(&h.chat).unwrap();
    assert_eq!(summary.last_message_timestamp, Some(1_010));
    assert_eq!(summary.last_message_text.as_deref(), Some("newer text"));
    let listed = list.chat(&h.chat).unwrap();
    assert_eq!(listed.last_message_timestamp, Some(1_010));
    assert_eq!(listed.last_message_text.as_deref(), Some("newer text"));
    list.stop().await;
}

#[tokio::test]
async fn send_confirmed_during_resync_stays_in_view() {
    let h = Harness::new().await;
    h.seed(&[("m1", 10, "a")]).await;
    let chat = h.open().await;
    h.delays.fetch(Duration::from_millis(150));

    let resync = tokio::spawn({
        let chat = chat.clone();
        async move { chat.resync().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let id = chat.send_text("during resync", None).await.unwrap().unwrap();
    resync.await.unwrap().unwrap();

    assert!(chat.message(&id).map(|m| m.is_persisted()).unwrap_or(false));
    assert!(h.backend.messages(&h.chat).iter().any(|m| m.id == id));
    assert_eq!(ids(&chat.messages()), vec!["m1".to_string(), id.0.clone()]);
}

#[tokio::test]
async fn slow_edit_does_not_overwrite_newer_send() {
    let h = Harness::new().await;
    h.seed(&[("m10", 10, "hi")]).await;
    let list = h.aggregator();
    list.start().await.unwrap();
    let chat = h.open_with(&list).await;
    h.delays.update(Duration::from_millis(150));

    let edit = tokio::spawn({
        let chat = chat.clone();
        async move { chat.edit(&MessageId::from("m10"), "hello").await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    chat.send_text("newer", None).await.unwrap();
    edit.await.unwrap().unwrap();
    settle().await;

    assert_eq!(chat.message(&MessageId::from("m10")).unwrap().text, "hello");
    let summary = h.backend.chat(&h.chat).unwrap();
    assert_eq!(summary.last_message_text.as_deref(), Some("newer"));
    assert_eq!(summary.last_message_timestamp, Some(common::START));
    let listed = list.chat(&h.chat).unwrap();
    assert_eq!(listed.last_message_text.as_deref(), Some("newer"));
    list.stop().await;
}

#[tokio::test]
async fn configured_image_preview_reaches_backend_summary() {
    let config = SyncConfig {
        image_preview: "Picture".into(),
        ..SyncConfig::default()
    };
    let h = Harness::with_config(config).await;
    let list = h.aggregator();
    list.start().await.unwrap();
    let chat = h.open_with(&list).await;

    let id = chat.send_image(Bytes::from_static(b"img"), None).await.unwrap();
    eventually("image finalized", || {
        chat.message(&id).map(|m| m.image_ref.is_some()).unwrap_or(false)
    })
    .await;
    eventually("summary written", || {
        h.backend.chat(&h.chat).and_then(|c| c.last_message_text).as_deref() == Some("Picture")
    })
    .await;
    settle().await;
    assert_eq!(
        list.chat(&h.chat).unwrap().last_message_text.as_deref(),
        Some("Picture")
    );
    list.stop().await;
}
