//! Audit log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::types::{Actor, IntakeMessage, OnboardingSession, Student};

/// Access verb recorded with each entry.
///
/// The set is open: callers pick the verb, the logger never validates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditAction {
    Read,
    Write,
    Notify,
    Other(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::Read => "read",
            AuditAction::Write => "write",
            AuditAction::Notify => "notify",
            AuditAction::Other(s) => s,
        }
    }
}

impl From<&str> for AuditAction {
    fn from(s: &str) -> Self {
        match s {
            "read" => AuditAction::Read,
            "write" => AuditAction::Write,
            "notify" => AuditAction::Notify,
            other => AuditAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AuditAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuditAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AuditAction::from(s.as_str()))
    }
}

/// The thing that was accessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntity {
    pub entity_type: String,
    pub entity_id: String,
}

impl AuditEntity {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl From<&Actor> for AuditEntity {
    fn from(actor: &Actor) -> Self {
        Self::new(actor.actor_type(), actor.id.clone())
    }
}

impl From<&Student> for AuditEntity {
    fn from(student: &Student) -> Self {
        Self::new("Student", student.id.clone())
    }
}

impl From<&OnboardingSession> for AuditEntity {
    fn from(session: &OnboardingSession) -> Self {
        Self::new("OnboardingSession", session.id.to_string())
    }
}

impl From<&IntakeMessage> for AuditEntity {
    fn from(message: &IntakeMessage) -> Self {
        Self::new("IntakeMessage", message.id.to_string())
    }
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    /// `None` for anonymous access
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(actor: Option<&Actor>, action: AuditAction, entity: &AuditEntity) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor.map(|a| a.id.clone()),
            actor_type: actor.map(|a| a.actor_type().to_string()),
            action,
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
            before: None,
            after: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_changes(
        mut self,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        self.before = before;
        self.after = after;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trips_through_strings() {
        assert_eq!(AuditAction::from("read"), AuditAction::Read);
        assert_eq!(
            AuditAction::from("export"),
            AuditAction::Other("export".into())
        );
        assert_eq!(
            serde_json::to_value(AuditAction::Notify).unwrap(),
            serde_json::json!("notify")
        );
    }

    #[test]
    fn test_anonymous_entry() {
        let entry = AuditLogEntry::new(
            None,
            AuditAction::Read,
            &AuditEntity::new("Student", "s1"),
        );
        assert!(entry.actor_id.is_none());
        assert!(entry.actor_type.is_none());
        assert_eq!(entry.entity_type, "Student");
    }

    #[test]
    fn test_entry_attributes_actor() {
        let actor = Actor::parent("p1", "p1@example.com", None);
        let entry = AuditLogEntry::new(Some(&actor), AuditAction::Write, &(&actor).into());
        assert_eq!(entry.actor_id.as_deref(), Some("p1"));
        assert_eq!(entry.actor_type.as_deref(), Some("Parent"));
        assert_eq!(entry.entity_id, "p1");
    }
}
