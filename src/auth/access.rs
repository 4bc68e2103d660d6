//! Per-resource authorization
//!
//! Resources are a closed set of kinds. Each kind carries the typed payload
//! needed to trace ownership back to a parent, so no lookup by type name
//! ever happens here.

use std::sync::Arc;
use tracing::{debug, warn};

use super::permissions::{self, Permission, Role};
use crate::audit::AuditEntity;
use crate::store::AppointmentStore;
use crate::types::{Actor, Appointment, GatewayError, OnboardingSession, Student};

/// Anything that can be authorization-checked
#[derive(Debug, Clone)]
pub enum AccessibleResource {
    Parent { id: String },
    Therapist { id: String },
    Student(Student),
    OnboardingSession(OnboardingSession),
    Appointment {
        appointment: Appointment,
        /// Parent of the appointment's student, when the caller resolved it
        parent_id: Option<String>,
    },
    /// Any other entity reached through a session or a `parent_id` relation
    /// (intake messages, uploaded documents, ...)
    SessionScoped {
        entity: AuditEntity,
        session: Option<OnboardingSession>,
        parent_id: Option<String>,
    },
}

impl AccessibleResource {
    /// An entity that belongs to `session`
    pub fn in_session(entity: AuditEntity, session: OnboardingSession) -> Self {
        Self::SessionScoped {
            entity,
            session: Some(session),
            parent_id: None,
        }
    }

    /// The parent at the end of the ownership chain, if there is one
    pub fn owner_parent_id(&self) -> Option<&str> {
        match self {
            Self::Parent { id } => Some(id.as_str()),
            Self::Therapist { .. } => None,
            Self::Student(student) => Some(&student.parent_id),
            Self::OnboardingSession(session) => Some(&session.parent_id),
            Self::Appointment { parent_id, .. } => parent_id.as_deref(),
            Self::SessionScoped {
                session, parent_id, ..
            } => session
                .as_ref()
                .map(|s| s.parent_id.as_str())
                .or(parent_id.as_deref()),
        }
    }

    /// Audit identity of the resource
    pub fn entity(&self) -> AuditEntity {
        match self {
            Self::Parent { id } => AuditEntity::new("Parent", id.clone()),
            Self::Therapist { id } => AuditEntity::new("Therapist", id.clone()),
            Self::Student(student) => student.into(),
            Self::OnboardingSession(session) => session.into(),
            Self::Appointment { appointment, .. } => {
                AuditEntity::new("Appointment", appointment.id.clone())
            }
            Self::SessionScoped { entity, .. } => entity.clone(),
        }
    }

    /// The error a caller sees when denied this resource. It matches what a
    /// missing resource of the same kind reports.
    pub fn hidden(&self) -> GatewayError {
        match self {
            Self::Student(student) => GatewayError::not_found("student", &student.id),
            Self::OnboardingSession(session) => GatewayError::not_found("session", session.id),
            Self::Appointment { appointment, .. } => {
                GatewayError::not_found("appointment", &appointment.id)
            }
            other => {
                let entity = other.entity();
                GatewayError::not_found(&entity.entity_type.to_ascii_lowercase(), entity.entity_id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parent { .. } => "Parent",
            Self::Therapist { .. } => "Therapist",
            Self::Student(_) => "Student",
            Self::OnboardingSession(_) => "OnboardingSession",
            Self::Appointment { .. } => "Appointment",
            Self::SessionScoped { .. } => "SessionScoped",
        }
    }
}

/// Role and ownership checks.
///
/// Checks are explicit: nothing here runs unless a caller asks. The request
/// pipeline makes the asking mandatory for routed operations.
#[derive(Clone)]
pub struct AuthorizationEngine {
    appointments: Arc<dyn AppointmentStore>,
}

impl AuthorizationEngine {
    pub fn new(appointments: Arc<dyn AppointmentStore>) -> Self {
        Self { appointments }
    }

    /// Does the actor's role grant `permission`?
    pub fn can(&self, actor: Option<&Actor>, permission: Permission) -> bool {
        permissions::can(actor, permission)
    }

    /// May the actor access this particular resource?
    pub async fn can_access(&self, actor: Option<&Actor>, resource: &AccessibleResource) -> bool {
        let Some(actor) = actor else {
            return false;
        };

        let allowed = match actor.role {
            Some(Role::Admin) => true,
            // Broad read for staff; write scope is not narrowed here
            Some(Role::Staff) => true,
            Some(Role::Parent) => resource.owner_parent_id() == Some(actor.id.as_str()),
            Some(Role::Therapist) => self.therapist_can_access(&actor.id, resource).await,
            None => false,
        };

        debug!(
            actor_id = %actor.id,
            role = actor.role.map(|r| r.as_str()).unwrap_or("none"),
            resource = resource.kind(),
            allowed,
            "Resource access check"
        );

        allowed
    }

    async fn therapist_can_access(&self, therapist_id: &str, resource: &AccessibleResource) -> bool {
        let lookup = match resource {
            AccessibleResource::Appointment { appointment, .. } => {
                return appointment.therapist_id == therapist_id;
            }
            AccessibleResource::Student(student) => {
                self.appointments
                    .therapist_assigned_to_student(therapist_id, &student.id)
                    .await
            }
            AccessibleResource::OnboardingSession(session) => {
                match self
                    .appointments
                    .therapist_assigned_to_session(therapist_id, session.id)
                    .await
                {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        self.appointments
                            .therapist_assigned_to_student(therapist_id, &session.student_id)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            // No assignment rules for other kinds yet
            _ => return false,
        };

        lookup.unwrap_or_else(|e| {
            warn!(
                therapist_id,
                resource = resource.kind(),
                error = %e,
                "Appointment lookup failed; denying access"
            );
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::SessionStatus;

    fn engine_with(store: Arc<MemoryStore>) -> AuthorizationEngine {
        AuthorizationEngine::new(store)
    }

    fn actor(id: &str, role: Option<Role>) -> Actor {
        Actor::parent(id, format!("{}@example.com", id), role)
    }

    fn student(id: &str, parent: &str) -> Student {
        Student {
            id: id.into(),
            parent_id: parent.into(),
            first_name: "Sam".into(),
        }
    }

    #[tokio::test]
    async fn test_parent_cannot_access_other_parents_session() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let p1 = actor("p1", Some(Role::Parent));
        let session = OnboardingSession::new("p2", "s1", SessionStatus::Active);

        assert!(
            !engine
                .can_access(Some(&p1), &AccessibleResource::OnboardingSession(session))
                .await
        );
    }

    #[tokio::test]
    async fn test_parent_ownership_chain() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let p1 = actor("p1", Some(Role::Parent));
        let own_session = OnboardingSession::new("p1", "s1", SessionStatus::Active);

        let allowed = [
            AccessibleResource::Parent { id: "p1".into() },
            AccessibleResource::Student(student("s1", "p1")),
            AccessibleResource::OnboardingSession(own_session.clone()),
            AccessibleResource::in_session(AuditEntity::new("IntakeMessage", "m1"), own_session),
            AccessibleResource::SessionScoped {
                entity: AuditEntity::new("Document", "d1"),
                session: None,
                parent_id: Some("p1".into()),
            },
        ];
        for resource in &allowed {
            assert!(
                engine.can_access(Some(&p1), resource).await,
                "{} should be accessible",
                resource.kind()
            );
        }

        let denied = [
            AccessibleResource::Parent { id: "p2".into() },
            AccessibleResource::Student(student("s2", "p2")),
            AccessibleResource::Therapist { id: "t1".into() },
            AccessibleResource::SessionScoped {
                entity: AuditEntity::new("Document", "d2"),
                session: None,
                parent_id: None,
            },
            AccessibleResource::Appointment {
                appointment: Appointment {
                    id: "a1".into(),
                    student_id: "s1".into(),
                    therapist_id: "t1".into(),
                    session_id: None,
                },
                parent_id: None,
            },
        ];
        for resource in &denied {
            assert!(
                !engine.can_access(Some(&p1), resource).await,
                "{} should be denied",
                resource.kind()
            );
        }
    }

    #[tokio::test]
    async fn test_staff_has_broad_read() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let staff = actor("st1", Some(Role::Staff));

        assert!(
            engine
                .can_access(
                    Some(&staff),
                    &AccessibleResource::Therapist { id: "t9".into() }
                )
                .await
        );
        assert!(
            engine
                .can_access(
                    Some(&staff),
                    &AccessibleResource::Student(student("s1", "p1"))
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_admin_and_roleless() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let resource = AccessibleResource::Student(student("s1", "p1"));

        assert!(
            engine
                .can_access(Some(&actor("a1", Some(Role::Admin))), &resource)
                .await
        );
        assert!(!engine.can_access(Some(&actor("p1", None)), &resource).await);
        assert!(!engine.can_access(None, &resource).await);
    }

    #[tokio::test]
    async fn test_therapist_needs_assignment() {
        let store = Arc::new(MemoryStore::new());
        let session = OnboardingSession::new("p1", "s1", SessionStatus::Active);
        store.insert_appointment(Appointment {
            id: "a1".into(),
            student_id: "s1".into(),
            therapist_id: "t1".into(),
            session_id: Some(session.id),
        });
        let engine = engine_with(store);

        let t1 = actor("t1", Some(Role::Therapist));
        let t2 = actor("t2", Some(Role::Therapist));

        let student_res = AccessibleResource::Student(student("s1", "p1"));
        let session_res = AccessibleResource::OnboardingSession(session.clone());

        assert!(engine.can_access(Some(&t1), &student_res).await);
        assert!(engine.can_access(Some(&t1), &session_res).await);
        assert!(!engine.can_access(Some(&t2), &student_res).await);
        assert!(!engine.can_access(Some(&t2), &session_res).await);

        // Assigned or not, other kinds stay closed
        assert!(
            !engine
                .can_access(
                    Some(&t1),
                    &AccessibleResource::in_session(AuditEntity::new("IntakeMessage", "m1"), session)
                )
                .await
        );
        assert!(
            !engine
                .can_access(Some(&t1), &AccessibleResource::Parent { id: "p1".into() })
                .await
        );
    }

    #[tokio::test]
    async fn test_therapist_matches_appointment_directly() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let appointment = AccessibleResource::Appointment {
            appointment: Appointment {
                id: "a1".into(),
                student_id: "s1".into(),
                therapist_id: "t1".into(),
                session_id: None,
            },
            parent_id: Some("p1".into()),
        };

        assert!(
            engine
                .can_access(Some(&actor("t1", Some(Role::Therapist))), &appointment)
                .await
        );
        assert!(
            !engine
                .can_access(Some(&actor("t2", Some(Role::Therapist))), &appointment)
                .await
        );
        assert!(
            engine
                .can_access(Some(&actor("p1", Some(Role::Parent))), &appointment)
                .await
        );
    }

    #[test]
    fn test_can_delegates_to_role_table() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        let parent = actor("p1", Some(Role::Parent));
        assert!(engine.can(Some(&parent), Permission::WriteOwn));
        assert!(!engine.can(Some(&parent), Permission::WriteAll));
        assert!(!engine.can(None, Permission::ReadOwn));
    }
}
