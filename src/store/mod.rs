//! Persistence seams
//!
//! The gateway only needs a handful of lookups and inserts from the domain
//! database. Each concern is a small trait so the MongoDB backend and the
//! in-memory backend can be swapped behind `Arc<dyn ...>`.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::types::{Actor, IntakeMessage, OnboardingSession, Result, Student};

pub use memory::{MemoryStore, DEV_PARENT_ID, DEV_STUDENT_ID};

#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn find_actor(&self, id: &str) -> Result<Option<Actor>>;
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn find_student(&self, id: &str) -> Result<Option<Student>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, id: Uuid) -> Result<Option<OnboardingSession>>;

    /// The `active` session for a (parent, student) pair, if any
    async fn find_active_session(
        &self,
        parent_id: &str,
        student_id: &str,
    ) -> Result<Option<OnboardingSession>>;

    async fn insert_session(&self, session: &OnboardingSession) -> Result<()>;

    /// Replace the stored session with the same id
    async fn update_session(&self, session: &OnboardingSession) -> Result<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &IntakeMessage) -> Result<()>;

    async fn find_message(&self, id: Uuid) -> Result<Option<IntakeMessage>>;

    /// All messages of a session in creation order
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<IntakeMessage>>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn therapist_assigned_to_student(
        &self,
        therapist_id: &str,
        student_id: &str,
    ) -> Result<bool>;

    async fn therapist_assigned_to_session(
        &self,
        therapist_id: &str,
        session_id: Uuid,
    ) -> Result<bool>;
}

/// Every store the gateway talks to
#[derive(Clone)]
pub struct Stores {
    pub actors: Arc<dyn ActorStore>,
    pub students: Arc<dyn StudentStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub appointments: Arc<dyn AppointmentStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Use one backend for every concern
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ActorStore
            + StudentStore
            + SessionStore
            + MessageStore
            + AppointmentStore
            + AuditSink
            + 'static,
    {
        Self {
            actors: backend.clone(),
            students: backend.clone(),
            sessions: backend.clone(),
            messages: backend.clone(),
            appointments: backend.clone(),
            audit: backend,
        }
    }

    /// Route audit entries to a different sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }
}
