//! Intake message schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{GatewayError, IntakeMessage, MessageRole};

pub const MESSAGE_COLLECTION: &str = "intake_messages";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub message_id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime,
}

impl From<&IntakeMessage> for MessageDoc {
    fn from(message: &IntakeMessage) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            message_id: message.id.to_string(),
            session_id: message.session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            created_at: DateTime::from_chrono(message.created_at),
        }
    }
}

impl TryFrom<MessageDoc> for IntakeMessage {
    type Error = GatewayError;

    fn try_from(doc: MessageDoc) -> Result<Self, Self::Error> {
        let parse = |s: &str| {
            Uuid::parse_str(s).map_err(|e| GatewayError::Database(format!("Corrupt id: {}", e)))
        };

        Ok(IntakeMessage {
            id: parse(&doc.message_id)?,
            session_id: parse(&doc.session_id)?,
            role: doc.role,
            content: doc.content,
            created_at: doc.created_at.to_chrono(),
        })
    }
}

impl IntoIndexes for MessageDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "message_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("message_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "session_id": 1, "created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("session_history_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for MessageDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
