//! Onboarding session schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{GatewayError, OnboardingSession, SessionStatus};

pub const SESSION_COLLECTION: &str = "onboarding_sessions";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub session_id: String,
    pub parent_id: String,
    pub student_id: String,
    pub status: SessionStatus,
    pub current_step: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,

    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl From<&OnboardingSession> for SessionDoc {
    fn from(session: &OnboardingSession) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            session_id: session.id.to_string(),
            parent_id: session.parent_id.clone(),
            student_id: session.student_id.clone(),
            status: session.status,
            current_step: session.current_step,
            completed_at: session.completed_at.map(DateTime::from_chrono),
            created_at: DateTime::from_chrono(session.created_at),
            updated_at: DateTime::from_chrono(session.updated_at),
        }
    }
}

impl TryFrom<SessionDoc> for OnboardingSession {
    type Error = GatewayError;

    fn try_from(doc: SessionDoc) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&doc.session_id)
            .map_err(|e| GatewayError::Database(format!("Corrupt session id: {}", e)))?;

        Ok(OnboardingSession {
            id,
            parent_id: doc.parent_id,
            student_id: doc.student_id,
            status: doc.status,
            current_step: doc.current_step,
            completed_at: doc.completed_at.map(|d| d.to_chrono()),
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        })
    }
}

impl IntoIndexes for SessionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "session_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("session_id_unique".to_string())
                        .build(),
                ),
            ),
            // One active session per (parent, student) pair
            (
                doc! { "parent_id": 1, "student_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "status": "active" })
                        .name("active_pair_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
