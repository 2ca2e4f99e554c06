mod common;

use std::time::Duration;

use common::{caller, Harness};
use todo_assistant::agent::SendRequest;
use todo_assistant::ai::llm::CapabilityError;
use todo_assistant::db::TranscriptStore;
use todo_assistant::error::AppError;
use uuid::Uuid;

fn send(conversation_id: Option<Uuid>, message: &str) -> SendRequest {
    SendRequest {
        conversation_id,
        message: message.to_string(),
    }
}

#[tokio::test]
async fn first_message_creates_conversation_and_adds_task() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability
        .push_tool_call("", "add_task", serde_json::json!({"title": "buy milk"}));
    h.capability.push_text("Added 'buy milk' to your list.");

    let reply = h
        .orchestrator()
        .send_message(&alice, send(None, "Add buy milk"))
        .await
        .unwrap();

    assert_eq!(reply.response, "Added 'buy milk' to your list.");
    let calls = reply.tool_calls.expect("one tool call");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "add_task");
    assert_eq!(calls[0].result["success"], true);

    let task_id = calls[0].result["task_id"].as_i64().expect("task id");
    let task = h.store.task_row(task_id).expect("task row");
    assert_eq!(task.title, "buy milk");
    assert_eq!(task.owner_id, "alice");
    assert!(!task.completed);

    let messages = h.store.message_rows(reply.conversation_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "Add buy milk");
    assert_eq!(messages[1].role, "assistant");
    assert!(messages[1].tool_calls.is_some());
}

#[tokio::test]
async fn follow_up_turn_sees_history_and_updates_the_task() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability
        .push_tool_call("", "add_task", serde_json::json!({"title": "buy milk"}));
    h.capability.push_text("Added 'buy milk'.");
    let first = h
        .orchestrator()
        .send_message(&alice, send(None, "Add buy milk"))
        .await
        .unwrap();

    h.capability.push_tool_call(
        "",
        "update_task",
        serde_json::json!({"task_id": 1, "title": "buy almond milk"}),
    );
    h.capability.push_text("Changed it to almond milk.");
    let second = h
        .orchestrator()
        .send_message(
            &alice,
            send(Some(first.conversation_id), "Actually make that almond milk"),
        )
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(h.store.task_row(1).unwrap().title, "buy almond milk");

    // The first call of turn two carried system prompt + the three stored
    // messages, including the just-persisted user turn.
    let sizes = h.capability.context_sizes();
    assert_eq!(sizes[0], 2);
    assert_eq!(sizes[2], 4);
}

#[tokio::test]
async fn capability_outage_preserves_the_user_message() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability.push_text("Hi! How can I help?");
    let first = h
        .orchestrator()
        .send_message(&alice, send(None, "hello"))
        .await
        .unwrap();

    // Initial attempt plus two retries, all timing out.
    for _ in 0..3 {
        h.capability
            .push_failure(CapabilityError::Timeout(Duration::from_secs(30)));
    }

    let err = h
        .orchestrator()
        .send_message(&alice, send(Some(first.conversation_id), "Add buy milk"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::CapabilityUnavailable(_)));
    assert_eq!(err.code(), "AI_SERVICE_UNAVAILABLE");
    // The fallback hint tells the user direct task management still works.
    assert!(err.user_message().contains("directly"));

    // Durability: the failed turn's user message is persisted, and no
    // assistant message was written for it.
    let messages = h.store.message_rows(first.conversation_id);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].role, "user");
    assert_eq!(messages[2].content, "Add buy milk");
}

#[tokio::test]
async fn transient_failures_are_retried_then_succeed() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability
        .push_failure(CapabilityError::Transport("502 bad gateway".to_string()));
    h.capability.push_text("Hello!");

    let reply = h
        .orchestrator()
        .send_message(&alice, send(None, "hi"))
        .await
        .unwrap();

    assert_eq!(reply.response, "Hello!");
    assert_eq!(h.capability.calls(), 2);
}

#[tokio::test]
async fn malformed_replies_are_not_retried() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability
        .push_failure(CapabilityError::Malformed("not json".to_string()));

    let err = h
        .orchestrator()
        .send_message(&alice, send(None, "hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::CapabilityUnavailable(_)));
    assert_eq!(h.capability.calls(), 1);
}

#[tokio::test]
async fn clarification_reply_carries_no_tool_calls() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability
        .push_text("You have two tasks mentioning milk. Which one did you mean?");

    let reply = h
        .orchestrator()
        .send_message(&alice, send(None, "delete the milk task"))
        .await
        .unwrap();

    assert!(reply.tool_calls.is_none());
    assert_eq!(h.capability.calls(), 1);

    let messages = h.store.message_rows(reply.conversation_id);
    assert_eq!(messages.len(), 2);
    assert!(messages[1].tool_calls.is_none());
}

#[tokio::test]
async fn blank_model_text_degrades_to_the_help_reply() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability.push_text("   ");
    let reply = h
        .orchestrator()
        .send_message(&alice, send(None, "???"))
        .await
        .unwrap();

    assert!(reply.response.contains("add, list, complete, delete, or update"));
}

#[tokio::test]
async fn partial_tool_failure_is_recorded_and_still_persisted() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability.push_reply(todo_assistant::ai::llm::ModelReply {
        text: String::new(),
        tool_requests: vec![
            todo_assistant::agent::tools::ToolRequest {
                name: "add_task".to_string(),
                arguments: serde_json::json!({"title": "buy milk"}),
            },
            todo_assistant::agent::tools::ToolRequest {
                name: "reboot_server".to_string(),
                arguments: serde_json::json!({}),
            },
        ],
    });
    // The closing turn fails too: the pipeline must fall back to the
    // deterministic outcome summary rather than dropping the message.
    h.capability
        .push_failure(CapabilityError::Malformed("junk".to_string()));

    let reply = h
        .orchestrator()
        .send_message(&alice, send(None, "add milk and reboot"))
        .await
        .unwrap();

    let calls = reply.tool_calls.expect("both calls recorded");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].result["success"], true);
    assert_eq!(calls[1].result["success"], false);
    assert_eq!(calls[1].result["error_code"], "VALIDATION_ERROR");

    assert!(reply.response.contains("created successfully"));
    assert!(reply.response.contains("Unknown tool"));

    let messages = h.store.message_rows(reply.conversation_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, "assistant");
}

#[tokio::test]
async fn empty_and_oversized_messages_are_rejected_before_any_work() {
    let h = Harness::new();
    let alice = caller("alice");

    let err = h
        .orchestrator()
        .send_message(&alice, send(None, "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    let err = h
        .orchestrator()
        .send_message(&alice, send(None, &"x".repeat(2001)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));

    assert_eq!(h.capability.calls(), 0);
}

#[tokio::test]
async fn unknown_conversation_reference_is_not_found() {
    let h = Harness::new();
    let alice = caller("alice");

    let err = h
        .orchestrator()
        .send_message(&alice, send(Some(Uuid::new_v4()), "hello"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "CONVERSATION_NOT_FOUND");
    assert_eq!(h.capability.calls(), 0);
}

#[tokio::test]
async fn fresh_orchestrators_continue_a_conversation_seamlessly() {
    let h = Harness::new();
    let alice = caller("alice");

    h.capability.push_text("Hi!");
    h.capability.push_text("Still here, with full history.");

    // Two pipeline runs, each through a brand-new orchestrator value; the
    // only continuity is the store.
    let first = h
        .orchestrator()
        .send_message(&alice, send(None, "hello"))
        .await
        .unwrap();
    let second = h
        .orchestrator()
        .send_message(&alice, send(Some(first.conversation_id), "still there?"))
        .await
        .unwrap();

    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(h.store.message_rows(first.conversation_id).len(), 4);
    // Second run loaded the full transcript: system + 3 prior messages.
    assert_eq!(h.capability.context_sizes(), vec![2, 4]);
}

#[tokio::test]
async fn concurrent_sends_to_one_conversation_both_land() {
    let h = Harness::new();
    let alice = caller("alice");

    let conversation = h.store.create_conversation(&alice).await.unwrap();
    h.capability.push_text("reply one");
    h.capability.push_text("reply two");

    let orch_a = h.orchestrator();
    let orch_b = h.orchestrator();
    let (a, b) = tokio::join!(
        orch_a.send_message(&alice, send(Some(conversation.id), "first")),
        orch_b.send_message(&alice, send(Some(conversation.id), "second")),
    );
    a.unwrap();
    b.unwrap();

    // No mutual exclusion: both turns succeed and interleave, nothing lost.
    let messages = h.store.message_rows(conversation.id);
    assert_eq!(messages.len(), 4);

    let mut seqs: Vec<i64> = messages.iter().map(|m| m.seq).collect();
    let sorted = {
        let mut s = seqs.clone();
        s.sort_unstable();
        s
    };
    seqs.sort_unstable();
    assert_eq!(seqs, sorted);
    seqs.dedup();
    assert_eq!(seqs.len(), 4);

    let user_turns: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .collect();
    assert!(user_turns.contains(&"first"));
    assert!(user_turns.contains(&"second"));
}
