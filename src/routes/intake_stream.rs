//! `POST /api/sessions/{id}/stream?messageId=`
//!
//! Authorization and history loading run through the pipeline like any
//! other operation. Once that succeeds the response switches to
//! `text/event-stream` and a spawned task relays the upstream reply.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderName, HeaderValue, CACHE_CONTROL};
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use super::respond;
use super::sessions::SessionRef;
use crate::auth::{AccessibleResource, RequestCredentials};
use crate::llm::ConversationContext;
use crate::pipeline::{AccessPolicy, Operation, RequestContext, WRITE_PERMISSIONS};
use crate::server::response::{response_with, BoxBody};
use crate::server::AppState;
use crate::stream::{StreamEvent, StreamOutcome};
use crate::types::{Actor, GatewayError, MessageRole, Result, SessionStatus};

/// Events buffered between the relay task and the response body
pub const STREAM_BUFFER: usize = 32;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    message_id: Option<String>,
}

/// What the relay task needs once access has been granted
#[derive(Debug)]
pub struct StreamPlan {
    pub actor: Actor,
    pub context: ConversationContext,
}

pub struct PrepareStream {
    session: SessionRef,
    message_id: Option<String>,
}

impl PrepareStream {
    pub fn new(state: Arc<AppState>, session_id: &str, message_id: Option<String>) -> Self {
        Self {
            session: SessionRef::new(state, session_id),
            message_id,
        }
    }

    fn message_id(&self) -> Result<Uuid> {
        let raw = self
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::invalid_field("messageId", "is required"))?;
        Uuid::parse_str(raw).map_err(|_| GatewayError::not_found("message", raw))
    }
}

#[async_trait]
impl Operation for PrepareStream {
    type Output = StreamPlan;

    fn name(&self) -> &'static str {
        "streamIntakeReply"
    }

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::AnyPermission(WRITE_PERMISSIONS)
    }

    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        self.session.resource().await
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<StreamPlan> {
        let actor = ctx.require_actor()?.clone();
        let session = self.session.load().await?;
        if session.status != SessionStatus::Active {
            return Err(GatewayError::invalid_field(
                "session",
                format!("is {}, not active", session.status),
            ));
        }

        let stores = &self.session.state().stores;
        let message_id = self.message_id()?;
        let trigger = stores
            .messages
            .find_message(message_id)
            .await?
            .filter(|m| m.session_id == session.id)
            .ok_or_else(|| GatewayError::not_found("message", message_id))?;

        if trigger.role != MessageRole::User {
            return Err(GatewayError::invalid_field(
                "messageId",
                "must reference a user message",
            ));
        }

        let history = stores.messages.list_messages(session.id).await?;
        Ok(StreamPlan {
            actor,
            context: ConversationContext::from_history(session.id, &history),
        })
    }
}

fn to_frame(event: StreamEvent) -> std::result::Result<Frame<Bytes>, hyper::Error> {
    Ok(Frame::data(event.to_sse_frame()))
}

/// Server-push response fed by `events`
pub fn sse_response(events: mpsc::Receiver<StreamEvent>) -> Response<BoxBody> {
    let body = BodyExt::boxed(StreamBody::new(ReceiverStream::new(events).map(to_frame)));

    let mut response = response_with(StatusCode::OK, "text/event-stream", body);
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

pub async fn stream_reply<B>(
    state: Arc<AppState>,
    req: Request<B>,
    session_id: &str,
) -> Response<BoxBody> {
    let credentials = RequestCredentials::from_request(&req);
    let query: StreamQuery = req
        .uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let op = PrepareStream::new(Arc::clone(&state), session_id, query.message_id);
    let plan = match state.pipeline.run(&credentials, &op).await {
        Ok(plan) => plan,
        Err(e) => return respond::<()>(&state, Err(e)),
    };

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let relay_state = Arc::clone(&state);
    tokio::spawn(async move {
        let outcome = relay_state
            .streamer
            .stream_reply(&plan.actor, &plan.context, relay_state.source.as_ref(), tx)
            .await;
        debug!(
            session_id = %plan.context.session_id,
            completed = matches!(outcome, StreamOutcome::Completed { .. }),
            "Stream task finished"
        );
    });

    sse_response(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sse_response_headers_and_frames() {
        let (tx, rx) = mpsc::channel(4);
        let response = sse_response(rx);

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "text/event-stream");
        assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
        assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");

        let id = Uuid::new_v4();
        tx.send(StreamEvent::chunk("Hi")).await.unwrap();
        tx.send(StreamEvent::complete(id)).await.unwrap();
        drop(tx);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            text,
            format!(
                "data: {{\"type\":\"chunk\",\"content\":\"Hi\"}}\n\n\
                 data: {{\"type\":\"complete\",\"message_id\":\"{}\"}}\n\n",
                id
            )
        );
    }
}
