//! MongoDB-backed stores

use async_trait::async_trait;
use bson::doc;
use tracing::info;
use uuid::Uuid;

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::*;
use crate::audit::{AuditLogEntry, AuditSink, AuditWriteFailure};
use crate::store::{ActorStore, AppointmentStore, MessageStore, SessionStore, StudentStore};
use crate::types::{
    Actor, GatewayError, IntakeMessage, OnboardingSession, Result, SessionStatus,
    Student,
};

#[derive(Clone)]
pub struct MongoStore {
    parents: MongoCollection<ParentDoc>,
    students: MongoCollection<StudentDoc>,
    sessions: MongoCollection<SessionDoc>,
    messages: MongoCollection<MessageDoc>,
    appointments: MongoCollection<AppointmentDoc>,
    audit_logs: MongoCollection<AuditLogDoc>,
}

impl MongoStore {
    /// Open every collection, creating indexes as needed
    pub async fn open(client: &MongoClient) -> Result<Self> {
        let store = Self {
            parents: client.collection(PARENT_COLLECTION).await?,
            students: client.collection(STUDENT_COLLECTION).await?,
            sessions: client.collection(SESSION_COLLECTION).await?,
            messages: client.collection(MESSAGE_COLLECTION).await?,
            appointments: client.collection(APPOINTMENT_COLLECTION).await?,
            audit_logs: client.collection(AUDIT_LOG_COLLECTION).await?,
        };
        info!("MongoDB collections ready");
        Ok(store)
    }
}

#[async_trait]
impl ActorStore for MongoStore {
    async fn find_actor(&self, id: &str) -> Result<Option<Actor>> {
        Ok(self
            .parents
            .find_one(doc! { "parent_id": id })
            .await?
            .map(ParentDoc::into_actor))
    }
}

#[async_trait]
impl StudentStore for MongoStore {
    async fn find_student(&self, id: &str) -> Result<Option<Student>> {
        Ok(self
            .students
            .find_one(doc! { "student_id": id })
            .await?
            .map(Student::from))
    }
}

#[async_trait]
impl SessionStore for MongoStore {
    async fn find_session(&self, id: Uuid) -> Result<Option<OnboardingSession>> {
        self.sessions
            .find_one(doc! { "session_id": id.to_string() })
            .await?
            .map(OnboardingSession::try_from)
            .transpose()
    }

    async fn find_active_session(
        &self,
        parent_id: &str,
        student_id: &str,
    ) -> Result<Option<OnboardingSession>> {
        self.sessions
            .find_one(doc! {
                "parent_id": parent_id,
                "student_id": student_id,
                "status": SessionStatus::Active.as_str(),
            })
            .await?
            .map(OnboardingSession::try_from)
            .transpose()
    }

    async fn insert_session(&self, session: &OnboardingSession) -> Result<()> {
        self.sessions.insert_one(SessionDoc::from(session)).await
    }

    async fn update_session(&self, session: &OnboardingSession) -> Result<()> {
        let filter = doc! { "session_id": session.id.to_string() };
        let existing = self
            .sessions
            .find_one(filter.clone())
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("session {}", session.id)))?;

        let mut replacement = SessionDoc::from(session);
        replacement._id = existing._id;
        replacement.metadata = existing.metadata;

        if self.sessions.replace_one(filter, replacement).await? {
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!("session {}", session.id)))
        }
    }
}

#[async_trait]
impl MessageStore for MongoStore {
    async fn insert_message(&self, message: &IntakeMessage) -> Result<()> {
        self.messages.insert_one(MessageDoc::from(message)).await
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<IntakeMessage>> {
        self.messages
            .find_one(doc! { "message_id": id.to_string() })
            .await?
            .map(IntakeMessage::try_from)
            .transpose()
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<IntakeMessage>> {
        self.messages
            .find_many(
                doc! { "session_id": session_id.to_string() },
                doc! { "created_at": 1, "_id": 1 },
            )
            .await?
            .into_iter()
            .map(IntakeMessage::try_from)
            .collect()
    }
}

#[async_trait]
impl AppointmentStore for MongoStore {
    async fn therapist_assigned_to_student(
        &self,
        therapist_id: &str,
        student_id: &str,
    ) -> Result<bool> {
        self.appointments
            .exists(doc! { "therapist_id": therapist_id, "student_id": student_id })
            .await
    }

    async fn therapist_assigned_to_session(
        &self,
        therapist_id: &str,
        session_id: Uuid,
    ) -> Result<bool> {
        self.appointments
            .exists(doc! { "therapist_id": therapist_id, "session_id": session_id.to_string() })
            .await
    }
}

#[async_trait]
impl AuditSink for MongoStore {
    async fn append(&self, entry: AuditLogEntry) -> std::result::Result<(), AuditWriteFailure> {
        self.audit_logs
            .insert_one(AuditLogDoc::from(entry))
            .await
            .map_err(|e| AuditWriteFailure(e.to_string()))
    }
}
