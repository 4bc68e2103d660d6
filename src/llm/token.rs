//! Token streams from a completion source.

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::LlmError;

/// A chunk of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    /// Incremental text
    pub content: String,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

pin_project! {
    /// Stream of chunks from an upstream completion.
    ///
    /// Ends with `None` on success. A failure is delivered in-band as an
    /// `Err` item, after which the stream ends. Dropping the stream is how
    /// the consumer cancels the producer.
    pub struct TokenStream {
        #[pin]
        receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>,
        failed: bool,
    }
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<Result<StreamChunk, LlmError>>) -> Self {
        Self {
            receiver,
            failed: false,
        }
    }

    /// Create a sender/receiver pair for streaming.
    pub fn channel(buffer: usize) -> (TokenStreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (TokenStreamSender { sender: tx }, Self::new(rx))
    }
}

impl Stream for TokenStream {
    type Item = Result<StreamChunk, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.failed {
            return Poll::Ready(None);
        }

        match this.receiver.as_mut().poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                *this.failed = true;
                this.receiver.close();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

/// Producer half of a [`TokenStream`].
pub struct TokenStreamSender {
    sender: mpsc::Sender<Result<StreamChunk, LlmError>>,
}

impl TokenStreamSender {
    /// Send a content chunk. Fails once the consumer is gone.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), LlmError> {
        self.sender
            .send(Ok(StreamChunk::content(content)))
            .await
            .map_err(|_| LlmError::Cancelled)
    }

    /// Report an upstream failure and close.
    pub async fn fail(self, error: LlmError) {
        let _ = self.sender.send(Err(error)).await;
    }

    /// Resolves once the consumer has dropped the stream
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}
