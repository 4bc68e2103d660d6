//! Streamed intake replies end to end

mod common;

use http_body_util::BodyExt;
use hyper::{Method, StatusCode};
use std::time::Duration;

use common::{error_code, harness, Harness};
use intake_gateway::llm::ScriptedSource;
use intake_gateway::stream::{StreamEvent, StreamLimits, GENERIC_STREAM_ERROR};
use intake_gateway::types::MessageRole;

/// Collect the SSE body into decoded events
async fn stream_events(h: &Harness, actor: &str, session_id: &str, message_id: &str) -> Vec<StreamEvent> {
    let response = h
        .send(
            Method::POST,
            &format!("/api/sessions/{}/stream?messageId={}", session_id, message_id),
            Some(actor),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    text.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let json = frame.strip_prefix("data: ").expect("data frame");
            serde_json::from_str(json).unwrap()
        })
        .collect()
}

async fn assistant_messages(h: &Harness) -> Vec<String> {
    h.store
        .all_messages()
        .await
        .into_iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content)
        .collect()
}

#[tokio::test]
async fn test_chunks_then_complete_and_persist() {
    let h = harness().build();
    let session_id = h.start_session("p1", "st1").await;
    let message_id = h.post_message("p1", &session_id, "Hi").await;

    let events = stream_events(&h, "p1", &session_id, &message_id).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::chunk("Hel"));
    assert_eq!(events[1], StreamEvent::chunk("lo"));

    let StreamEvent::Complete { message_id: reply_id } = &events[2] else {
        panic!("expected completion");
    };

    let stored = h.store.all_messages().await;
    let reply = stored.iter().find(|m| m.id == *reply_id).unwrap();
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(reply.content, "Hello");
}

#[tokio::test]
async fn test_upstream_failure_sends_one_generic_error() {
    let h = harness()
        .source(ScriptedSource::new(["Hel"]).failing_after("model host exploded"))
        .build();
    let session_id = h.start_session("p1", "st1").await;
    let message_id = h.post_message("p1", &session_id, "Hi").await;

    let events = stream_events(&h, "p1", &session_id, &message_id).await;
    assert_eq!(
        events,
        vec![StreamEvent::chunk("Hel"), StreamEvent::generic_error()]
    );
    assert!(assistant_messages(&h).await.is_empty());

    let StreamEvent::Error { message } = &events[1] else {
        panic!("expected error event");
    };
    assert_eq!(message, GENERIC_STREAM_ERROR);
    assert!(!message.contains("exploded"));
}

#[tokio::test]
async fn test_stalled_upstream_times_out() {
    let h = harness()
        .source(ScriptedSource::new(["Hel"]).stalling())
        .stream_limits(StreamLimits {
            idle: Duration::from_millis(50),
            total: Duration::from_secs(5),
        })
        .build();
    let session_id = h.start_session("p1", "st1").await;
    let message_id = h.post_message("p1", &session_id, "Hi").await;

    let events = stream_events(&h, "p1", &session_id, &message_id).await;
    assert_eq!(events.last(), Some(&StreamEvent::generic_error()));
    assert!(assistant_messages(&h).await.is_empty());
}

#[tokio::test]
async fn test_stream_denied_for_other_parent() {
    let h = harness().build();
    let session_id = h.start_session("p1", "st1").await;
    let message_id = h.post_message("p1", &session_id, "Hi").await;

    let (status, json) = h
        .call(
            Method::POST,
            &format!("/api/sessions/{}/stream?messageId={}", session_id, message_id),
            Some("p2"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&json), "NOT_FOUND");

    let (status, _) = h
        .call(
            Method::POST,
            &format!("/api/sessions/{}/stream?messageId={}", session_id, message_id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(assistant_messages(&h).await.is_empty());
}

#[tokio::test]
async fn test_stream_requires_a_user_message_in_the_session() {
    let h = harness().build();
    let session_id = h.start_session("p1", "st1").await;
    let uri = |message_id: &str| {
        format!("/api/sessions/{}/stream?messageId={}", session_id, message_id)
    };

    let (status, json) = h
        .call(Method::POST, &format!("/api/sessions/{}/stream", session_id), Some("p1"), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["errors"][0]["extensions"]["fields"]["messageId"].is_string());

    let (status, _) = h
        .call(Method::POST, &uri(&uuid::Uuid::new_v4().to_string()), Some("p1"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A message from another session does not count
    let other_session = h.start_session("p2", "st2").await;
    let foreign = h.post_message("p2", &other_session, "Hi").await;
    let (status, _) = h.call(Method::POST, &uri(&foreign), Some("p1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Assistant replies cannot trigger another reply
    let message_id = h.post_message("p1", &session_id, "Hi").await;
    let events = stream_events(&h, "p1", &session_id, &message_id).await;
    let StreamEvent::Complete { message_id: reply_id } = events.last().unwrap() else {
        panic!("expected completion");
    };
    let (status, _) = h
        .call(Method::POST, &uri(&reply_id.to_string()), Some("p1"), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_finished_session_cannot_stream() {
    let h = harness().build();
    let session_id = h.start_session("p1", "st1").await;
    let message_id = h.post_message("p1", &session_id, "Hi").await;

    let (status, _) = h
        .call(
            Method::POST,
            &format!("/api/sessions/{}/abandon", session_id),
            Some("p1"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = h
        .call(
            Method::POST,
            &format!("/api/sessions/{}/stream?messageId={}", session_id, message_id),
            Some("p1"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&json), "VALIDATION_FAILED");
}
