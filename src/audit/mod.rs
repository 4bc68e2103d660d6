//! Best-effort access audit trail
//!
//! [`AuditLogger::log_access`] never fails from the caller's point of view:
//! a sink error is logged locally and dropped, so auditing can never abort
//! or roll back the operation that triggered it.

pub mod entry;
pub mod jsonl;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::Actor;

pub use entry::{AuditAction, AuditEntity, AuditLogEntry};
pub use jsonl::JsonlAuditSink;

/// An audit entry could not be persisted
#[derive(Debug, thiserror::Error)]
#[error("audit write failed: {0}")]
pub struct AuditWriteFailure(pub String);

/// Append-only destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), AuditWriteFailure>;
}

/// Writes access records through an [`AuditSink`]
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record one access. Infallible to the caller.
    pub async fn log_access(
        &self,
        actor: Option<&Actor>,
        action: AuditAction,
        entity: &AuditEntity,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let entry = AuditLogEntry::new(actor, action, entity).with_changes(before, after);
        let entry_id = entry.id;
        let action = entry.action.clone();

        match self.sink.append(entry).await {
            Ok(()) => debug!(
                %entry_id,
                %action,
                entity_type = %entity.entity_type,
                entity_id = %entity.entity_id,
                "Audit entry written"
            ),
            Err(e) => warn!(
                %action,
                entity_type = %entity.entity_type,
                entity_id = %entity.entity_id,
                actor_id = actor.map(|a| a.id.as_str()).unwrap_or("anonymous"),
                error = %e,
                "Audit write failed; continuing"
            ),
        }
    }

    /// Shorthand for a `read` entry without payloads
    pub async fn log_read(&self, actor: Option<&Actor>, entity: &AuditEntity) {
        self.log_access(actor, AuditAction::Read, entity, None, None)
            .await
    }

    /// Shorthand for a `write` entry carrying the new state
    pub async fn log_write(
        &self,
        actor: Option<&Actor>,
        entity: &AuditEntity,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        self.log_access(actor, AuditAction::Write, entity, before, after)
            .await
    }
}
