//! Relays an upstream completion to the client as server-push events.
//!
//! Each upstream chunk is forwarded as soon as it arrives. The assistant
//! message is persisted only once the upstream finishes; on any failure the
//! accumulated text is dropped and the client gets one generic `error`
//! event. A client that goes away ends the relay quietly.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::event::StreamEvent;
use crate::audit::AuditLogger;
use crate::llm::{CompletionSource, ConversationContext, LlmError, TokenStream};
use crate::store::MessageStore;
use crate::types::{Actor, GatewayError, IntakeMessage, MessageRole};

#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Longest silence tolerated between upstream chunks
    pub idle: Duration,
    /// Hard bound on the whole relay
    pub total: Duration,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(30),
            total: Duration::from_secs(180),
        }
    }
}

/// Why a stream failed. Logged, never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("upstream failed: {0}")]
    Upstream(#[from] LlmError),

    #[error("upstream idle for longer than {0:?}")]
    IdleTimeout(Duration),

    #[error("stream exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    #[error("upstream finished without producing text")]
    EmptyCompletion,

    #[error("failed to persist assistant message: {0}")]
    Persist(#[source] GatewayError),
}

/// How long a failure waits for room to deliver its `error` event
pub const ERROR_EVENT_GRACE: Duration = Duration::from_millis(500);

/// How a relay ended
#[derive(Debug)]
pub enum StreamOutcome {
    Completed { message_id: Uuid, content: String },
    Failed(StreamingError),
    /// The client stopped listening
    Disconnected,
}

#[derive(Clone)]
pub struct IntakeStreamer {
    messages: Arc<dyn MessageStore>,
    audit: AuditLogger,
    limits: StreamLimits,
}

enum Next {
    Item(Option<Result<String, LlmError>>),
    Idle,
    Deadline,
    ClientGone,
}

enum Delivery {
    Sent,
    Deadline,
    ClientGone,
}

/// Send `event` unless the client leaves or `deadline` passes first
async fn deliver(
    out: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
    deadline: Instant,
) -> Delivery {
    tokio::select! {
        biased;
        _ = tokio::time::sleep_until(deadline) => Delivery::Deadline,
        sent = out.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::ClientGone,
        },
    }
}

impl IntakeStreamer {
    pub fn new(messages: Arc<dyn MessageStore>, audit: AuditLogger, limits: StreamLimits) -> Self {
        Self {
            messages,
            audit,
            limits,
        }
    }

    pub fn limits(&self) -> StreamLimits {
        self.limits
    }

    /// Open the upstream for `context` and relay it to `out`.
    ///
    /// The total limit runs from here, so a slow open counts against it.
    pub async fn stream_reply(
        &self,
        actor: &Actor,
        context: &ConversationContext,
        source: &dyn CompletionSource,
        out: mpsc::Sender<StreamEvent>,
    ) -> StreamOutcome {
        let session_id = context.session_id;
        let deadline = Instant::now() + self.limits.total;

        let opened = tokio::select! {
            biased;
            _ = out.closed() => return StreamOutcome::Disconnected,
            _ = tokio::time::sleep_until(deadline) => {
                let err = StreamingError::DeadlineExceeded(self.limits.total);
                return self.fail(session_id, err, &out).await;
            }
            opened = tokio::time::timeout(self.limits.idle, source.open_stream(context)) => opened,
        };

        match opened {
            Ok(Ok(upstream)) => self.relay(actor, session_id, upstream, out, deadline).await,
            Ok(Err(e)) => self.fail(session_id, e.into(), &out).await,
            Err(_) => {
                self.fail(session_id, StreamingError::IdleTimeout(self.limits.idle), &out)
                    .await
            }
        }
    }

    /// Forward `upstream` to `out`, then persist and audit the full reply.
    ///
    /// Every send is bounded by `deadline`, so a client that stays connected
    /// but stops reading cannot pin the relay. `out` is owned here and
    /// dropped on every return path, which ends the response body.
    async fn relay(
        &self,
        actor: &Actor,
        session_id: Uuid,
        mut upstream: TokenStream,
        out: mpsc::Sender<StreamEvent>,
        deadline: Instant,
    ) -> StreamOutcome {
        let mut assembled = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = out.closed() => Next::ClientGone,
                _ = tokio::time::sleep_until(deadline) => Next::Deadline,
                item = tokio::time::timeout(self.limits.idle, upstream.next()) => match item {
                    Ok(item) => Next::Item(item.map(|r| r.map(|c| c.content))),
                    Err(_) => Next::Idle,
                },
            };

            let text = match next {
                Next::Item(Some(Ok(text))) => text,
                Next::Item(None) => break,
                Next::Item(Some(Err(e))) => return self.fail(session_id, e.into(), &out).await,
                Next::Idle => {
                    let err = StreamingError::IdleTimeout(self.limits.idle);
                    return self.fail(session_id, err, &out).await;
                }
                Next::Deadline => {
                    let err = StreamingError::DeadlineExceeded(self.limits.total);
                    return self.fail(session_id, err, &out).await;
                }
                Next::ClientGone => return self.disconnected(session_id, assembled.len()),
            };

            if text.is_empty() {
                continue;
            }

            assembled.push_str(&text);
            match deliver(&out, StreamEvent::chunk(text), deadline).await {
                Delivery::Sent => {}
                Delivery::ClientGone => return self.disconnected(session_id, assembled.len()),
                Delivery::Deadline => {
                    let err = StreamingError::DeadlineExceeded(self.limits.total);
                    return self.fail(session_id, err, &out).await;
                }
            }
        }

        if assembled.is_empty() {
            return self
                .fail(session_id, StreamingError::EmptyCompletion, &out)
                .await;
        }

        let message = IntakeMessage::new(session_id, MessageRole::Assistant, assembled);
        if let Err(e) = self.messages.insert_message(&message).await {
            return self
                .fail(session_id, StreamingError::Persist(e), &out)
                .await;
        }

        // Persisted already; the client can fetch it on reconnect
        match deliver(&out, StreamEvent::complete(message.id), deadline).await {
            Delivery::Sent => {}
            Delivery::ClientGone => {
                info!(%session_id, message_id = %message.id, "Client left before completion event")
            }
            Delivery::Deadline => {
                warn!(%session_id, message_id = %message.id, "Completion event not delivered before deadline")
            }
        }

        self.audit
            .log_write(
                Some(actor),
                &(&message).into(),
                None,
                serde_json::to_value(&message).ok(),
            )
            .await;

        info!(
            %session_id,
            message_id = %message.id,
            length = message.content.len(),
            "Intake reply streamed"
        );

        StreamOutcome::Completed {
            message_id: message.id,
            content: message.content,
        }
    }

    async fn fail(
        &self,
        session_id: Uuid,
        cause: StreamingError,
        out: &mpsc::Sender<StreamEvent>,
    ) -> StreamOutcome {
        error!(%session_id, error = %cause, "Intake stream failed; nothing persisted");

        if out
            .send_timeout(StreamEvent::generic_error(), ERROR_EVENT_GRACE)
            .await
            .is_err()
        {
            warn!(%session_id, "Client gone or not reading; error event not delivered");
        }

        StreamOutcome::Failed(cause)
    }

    fn disconnected(&self, session_id: Uuid, discarded: usize) -> StreamOutcome {
        info!(%session_id, discarded, "Client disconnected mid-stream; generation stopped");
        StreamOutcome::Disconnected
    }
}
