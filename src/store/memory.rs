//! In-process store backend
//!
//! Backs tests and dev mode runs without MongoDB. Writes can be made to fail
//! on demand so failure paths are testable.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ActorStore, AppointmentStore, MessageStore, SessionStore, StudentStore};
use crate::audit::{AuditLogEntry, AuditSink, AuditWriteFailure};
use crate::auth::Role;
use crate::types::{
    Actor, Appointment, GatewayError, IntakeMessage, OnboardingSession, Result, SessionStatus,
    Student,
};

/// Parent seeded into a dev-mode store so a fresh server is usable
pub const DEV_PARENT_ID: &str = "dev-parent";
/// Student of [`DEV_PARENT_ID`]
pub const DEV_STUDENT_ID: &str = "dev-student";

#[derive(Default)]
pub struct MemoryStore {
    actors: DashMap<String, Actor>,
    students: DashMap<String, Student>,
    sessions: DashMap<Uuid, OnboardingSession>,
    appointments: DashMap<String, Appointment>,
    /// Append-only, creation order
    messages: RwLock<Vec<IntakeMessage>>,
    audit: RwLock<Vec<AuditLogEntry>>,
    fail_audit_writes: AtomicBool,
    fail_message_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding one parent and their student
    pub fn seeded_for_dev() -> Self {
        let store = Self::new();
        store.insert_actor(Actor::parent(
            DEV_PARENT_ID,
            "dev-parent@localhost",
            Some(Role::Parent),
        ));
        store.insert_student(Student {
            id: DEV_STUDENT_ID.to_string(),
            parent_id: DEV_PARENT_ID.to_string(),
            first_name: "Dev".to_string(),
        });
        store
    }

    pub fn insert_actor(&self, actor: Actor) {
        self.actors.insert(actor.id.clone(), actor);
    }

    pub fn insert_student(&self, student: Student) {
        self.students.insert(student.id.clone(), student);
    }

    pub fn insert_appointment(&self, appointment: Appointment) {
        self.appointments
            .insert(appointment.id.clone(), appointment);
    }

    /// Make every audit append fail
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every message insert fail
    pub fn fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.read().await.clone()
    }

    pub async fn all_messages(&self) -> Vec<IntakeMessage> {
        self.messages.read().await.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl ActorStore for MemoryStore {
    async fn find_actor(&self, id: &str) -> Result<Option<Actor>> {
        Ok(self.actors.get(id).map(|a| a.clone()))
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn find_student(&self, id: &str) -> Result<Option<Student>> {
        Ok(self.students.get(id).map(|s| s.clone()))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_session(&self, id: Uuid) -> Result<Option<OnboardingSession>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn find_active_session(
        &self,
        parent_id: &str,
        student_id: &str,
    ) -> Result<Option<OnboardingSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| {
                s.parent_id == parent_id
                    && s.student_id == student_id
                    && s.status == SessionStatus::Active
            })
            .max_by_key(|s| s.created_at)
            .map(|s| s.clone()))
    }

    async fn insert_session(&self, session: &OnboardingSession) -> Result<()> {
        if self.sessions.contains_key(&session.id) {
            return Err(GatewayError::Database(format!(
                "duplicate session id {}",
                session.id
            )));
        }
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &OnboardingSession) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("session {}", session.id))),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &IntakeMessage) -> Result<()> {
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Database("message insert rejected".into()));
        }
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<IntakeMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<IntakeMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn therapist_assigned_to_student(
        &self,
        therapist_id: &str,
        student_id: &str,
    ) -> Result<bool> {
        Ok(self
            .appointments
            .iter()
            .any(|a| a.therapist_id == therapist_id && a.student_id == student_id))
    }

    async fn therapist_assigned_to_session(
        &self,
        therapist_id: &str,
        session_id: Uuid,
    ) -> Result<bool> {
        Ok(self
            .appointments
            .iter()
            .any(|a| a.therapist_id == therapist_id && a.session_id == Some(session_id)))
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: AuditLogEntry) -> std::result::Result<(), AuditWriteFailure> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(AuditWriteFailure("audit store unavailable".into()));
        }
        self.audit.write().await.push(entry);
        Ok(())
    }
}
