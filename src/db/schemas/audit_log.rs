//! Audit log schema. Insert-only; retention is handled outside the gateway.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditLogEntry};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const AUDIT_LOG_COLLECTION: &str = "audit_logs";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditLogDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub entry_id: String,
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,

    /// Payloads are stored as extended JSON documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<bson::Bson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<bson::Bson>,

    pub created_at: DateTime,
}

impl From<AuditLogEntry> for AuditLogDoc {
    fn from(entry: AuditLogEntry) -> Self {
        let to_bson = |v: serde_json::Value| bson::to_bson(&v).ok();

        Self {
            _id: None,
            metadata: Metadata::default(),
            entry_id: entry.id.to_string(),
            actor_id: entry.actor_id,
            actor_type: entry.actor_type,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            before: entry.before.and_then(to_bson),
            after: entry.after.and_then(to_bson),
            created_at: DateTime::from_chrono(entry.created_at),
        }
    }
}

impl IntoIndexes for AuditLogDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "entity_type": 1, "entity_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("entity_history_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "actor_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("actor_history_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AuditLogDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
