//! Parent principal schema
//!
//! Staff, therapists and admins live here too; they differ only by role.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::Actor;

pub const PARENT_COLLECTION: &str = "parents";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ParentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Identifier carried in token claims
    pub parent_id: String,

    pub email: String,

    /// Stored role name; unknown names grant nothing
    #[serde(default)]
    pub role: Option<String>,
}

impl ParentDoc {
    pub fn into_actor(self) -> Actor {
        let role = self.role.as_deref().and_then(|name| {
            let parsed = Role::parse(name);
            if parsed.is_none() {
                warn!(parent_id = %self.parent_id, role = name, "Unknown stored role; no permissions");
            }
            parsed
        });

        Actor::parent(self.parent_id, self.email, role)
    }
}

impl From<&Actor> for ParentDoc {
    fn from(actor: &Actor) -> Self {
        Self {
            _id: None,
            metadata: Metadata::default(),
            parent_id: actor.id.clone(),
            email: actor.email.clone(),
            role: actor.role.map(|r| r.as_str().to_string()),
        }
    }
}

impl IntoIndexes for ParentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "parent_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("parent_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for ParentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
