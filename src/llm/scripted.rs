//! Replays a fixed script of chunks. Used by tests and by dev mode when no
//! upstream model is configured.

use async_trait::async_trait;
use std::time::Duration;

use super::{CompletionSource, ConversationContext, LlmError, TokenStream};

#[derive(Debug, Clone)]
enum Ending {
    Finish,
    Fail(String),
    /// Never finish; the consumer's timeouts decide
    Stall,
}

#[derive(Debug, Clone)]
pub struct ScriptedSource {
    chunks: Vec<String>,
    delay: Option<Duration>,
    open_delay: Option<Duration>,
    ending: Ending,
    refuse: Option<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
            open_delay: None,
            ending: Ending::Finish,
            refuse: None,
        }
    }

    /// Emit the chunks, then fail with `reason`
    pub fn failing_after(mut self, reason: impl Into<String>) -> Self {
        self.ending = Ending::Fail(reason.into());
        self
    }

    /// Emit the chunks, then go silent without closing
    pub fn stalling(mut self) -> Self {
        self.ending = Ending::Stall;
        self
    }

    /// Refuse to open a stream at all
    pub fn refusing(mut self, reason: impl Into<String>) -> Self {
        self.refuse = Some(reason.into());
        self
    }

    /// Take `delay` to open the stream
    pub fn opening_after(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Pause before each chunk
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, _context: &ConversationContext) -> Result<TokenStream, LlmError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.refuse {
            return Err(LlmError::Unavailable(reason.clone()));
        }

        let (sender, stream) = TokenStream::channel(8);
        let script = self.clone();

        tokio::spawn(async move {
            for chunk in script.chunks {
                if let Some(delay) = script.delay {
                    tokio::time::sleep(delay).await;
                }
                if sender.send(chunk).await.is_err() {
                    return;
                }
            }

            match script.ending {
                Ending::Finish => drop(sender),
                Ending::Fail(reason) => sender.fail(LlmError::RequestFailed(reason)).await,
                // Hold the sender open until the consumer goes away
                Ending::Stall => sender.closed().await,
            }
        });

        Ok(stream)
    }
}
