//! Therapist appointment schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const APPOINTMENT_COLLECTION: &str = "appointments";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AppointmentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub appointment_id: String,
    pub student_id: String,
    pub therapist_id: String,

    /// Onboarding session UUID, when the appointment came out of one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl IntoIndexes for AppointmentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "appointment_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("appointment_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "therapist_id": 1, "student_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("therapist_student_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "therapist_id": 1, "session_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("therapist_session_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AppointmentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
