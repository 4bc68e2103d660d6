//! Server-push events for the intake chat stream

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only text a client ever sees when a stream fails
pub const GENERIC_STREAM_ERROR: &str =
    "Something went wrong while generating a reply. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental text, never the running total
    Chunk { content: String },
    Complete { message_id: Uuid },
    Error { message: String },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    pub fn complete(message_id: Uuid) -> Self {
        Self::Complete { message_id }
    }

    pub fn generic_error() -> Self {
        Self::Error {
            message: GENERIC_STREAM_ERROR.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// Encode as one `data: <json>\n\n` frame
    pub fn to_sse_frame(&self) -> Bytes {
        match serde_json::to_string(self) {
            Ok(json) => Bytes::from(format!("data: {}\n\n", json)),
            Err(_) => Bytes::from(format!(
                "data: {{\"type\":\"error\",\"message\":\"{}\"}}\n\n",
                GENERIC_STREAM_ERROR
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            StreamEvent::chunk("Hel").to_sse_frame(),
            Bytes::from("data: {\"type\":\"chunk\",\"content\":\"Hel\"}\n\n")
        );

        let id = Uuid::nil();
        assert_eq!(
            StreamEvent::complete(id).to_sse_frame(),
            Bytes::from(format!(
                "data: {{\"type\":\"complete\",\"message_id\":\"{}\"}}\n\n",
                id
            ))
        );

        let frame = StreamEvent::generic_error().to_sse_frame();
        let json: serde_json::Value =
            serde_json::from_slice(&frame[6..frame.len() - 2]).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], GENERIC_STREAM_ERROR);
    }

    #[test]
    fn test_terminal_events() {
        assert!(!StreamEvent::chunk("x").is_terminal());
        assert!(StreamEvent::complete(Uuid::nil()).is_terminal());
        assert!(StreamEvent::generic_error().is_terminal());
    }
}
