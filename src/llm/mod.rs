//! Upstream completion sources
//!
//! The gateway treats the model as an opaque producer of text chunks. A
//! [`CompletionSource`] turns a conversation into a [`TokenStream`].

pub mod openai;
pub mod scripted;
pub mod token;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IntakeMessage, MessageRole};

pub use openai::OpenAiSource;
pub use scripted::ScriptedSource;
pub use token::{StreamChunk, TokenStream, TokenStreamSender};

/// Error types for upstream completion.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    /// The consumer went away
    #[error("Stream cancelled")]
    Cancelled,
}

/// One turn handed to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Everything the model sees for one streamed reply
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session_id: Uuid,
    pub system_prompt: Option<String>,
    pub turns: Vec<ChatTurn>,
}

/// Default instructions for the intake assistant
pub const INTAKE_SYSTEM_PROMPT: &str = "You are a warm, concise intake assistant helping a parent \
describe their child's needs for pediatric therapy. Ask one question at a time. Do not give \
medical diagnoses.";

impl ConversationContext {
    /// Build from stored history, oldest first
    pub fn from_history(session_id: Uuid, history: &[IntakeMessage]) -> Self {
        Self {
            session_id,
            system_prompt: Some(INTAKE_SYSTEM_PROMPT.to_string()),
            turns: history
                .iter()
                .map(|m| ChatTurn {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
        }
    }
}

/// Producer of streamed completions
#[async_trait]
pub trait CompletionSource: Send + Sync {
    /// Model or source identifier
    fn id(&self) -> &str;

    /// Start generating. Errors here happen before any chunk exists.
    async fn open_stream(&self, context: &ConversationContext) -> Result<TokenStream, LlmError>;
}
