mod common;

use std::time::Duration;

use common::{caller, Harness};
use todo_assistant::agent::SendRequest;
use todo_assistant::db::TranscriptStore;
use todo_assistant::error::AppError;
use todo_assistant::ratelimit::RateLimiter;

fn send(message: &str) -> SendRequest {
    SendRequest {
        conversation_id: None,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn eleventh_send_in_the_window_is_rejected_with_a_retry_hint() {
    let h = Harness::new();
    let alice = caller("alice");

    let mut conversation_id = None;
    for i in 0..10 {
        let reply = h
            .orchestrator()
            .send_message(
                &alice,
                SendRequest {
                    conversation_id,
                    message: format!("message {}", i),
                },
            )
            .await
            .unwrap();
        conversation_id = Some(reply.conversation_id);
    }

    let err = h
        .orchestrator()
        .send_message(&alice, send("one too many"))
        .await
        .unwrap_err();

    match err {
        AppError::RateLimited { retry_after_secs } => {
            assert!(retry_after_secs >= 1);
            assert!(retry_after_secs <= 60);
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }

    // Reads sit under their own looser quota and still work.
    let conversation_id = conversation_id.unwrap();
    let views = h
        .orchestrator()
        .read_history(&alice, conversation_id, None)
        .await
        .unwrap();
    assert_eq!(views.len(), 20);
}

#[tokio::test]
async fn quotas_are_per_caller() {
    let h = Harness::with_limiter(RateLimiter::per_minute(1, 30));
    let alice = caller("alice");
    let bob = caller("bob");

    h.orchestrator()
        .send_message(&alice, send("hello"))
        .await
        .unwrap();
    let err = h
        .orchestrator()
        .send_message(&alice, send("again"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::RateLimited { .. }));

    // Another caller is unaffected.
    h.orchestrator()
        .send_message(&bob, send("hello"))
        .await
        .unwrap();
}

#[tokio::test]
async fn read_quota_trips_independently_of_sends() {
    let h = Harness::with_limiter(RateLimiter::per_minute(10, 3));
    let alice = caller("alice");
    let conversation = h.store.create_conversation(&alice).await.unwrap();

    for _ in 0..3 {
        h.orchestrator()
            .read_history(&alice, conversation.id, None)
            .await
            .unwrap();
    }
    let err = h
        .orchestrator()
        .read_history(&alice, conversation.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");

    // Sends draw from the other tier and still go through.
    h.orchestrator()
        .send_message(&alice, send("still fine"))
        .await
        .unwrap();
}

#[tokio::test]
async fn a_rejected_send_does_no_work_at_all() {
    let h = Harness::with_limiter(RateLimiter::per_minute(1, 30));
    let alice = caller("alice");

    let first = h
        .orchestrator()
        .send_message(&alice, send("hello"))
        .await
        .unwrap();

    h.orchestrator()
        .send_message(&alice, send("blocked"))
        .await
        .unwrap_err();

    // The limiter fires before the pipeline: no message was persisted and
    // the capability was never called for the rejected send.
    assert_eq!(h.store.message_rows(first.conversation_id).len(), 2);
    assert_eq!(h.capability.calls(), 1);
}

#[tokio::test]
async fn the_window_slides_open_again() {
    let h = Harness::with_limiter(RateLimiter::new(Duration::from_millis(30), 1, 1));
    let alice = caller("alice");

    h.orchestrator()
        .send_message(&alice, send("hello"))
        .await
        .unwrap();
    h.orchestrator()
        .send_message(&alice, send("blocked"))
        .await
        .unwrap_err();

    tokio::time::sleep(Duration::from_millis(40)).await;

    h.orchestrator()
        .send_message(&alice, send("welcome back"))
        .await
        .unwrap();
}
