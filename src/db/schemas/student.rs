//! Student schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::Student;

pub const STUDENT_COLLECTION: &str = "students";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StudentDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub student_id: String,
    pub parent_id: String,
    pub first_name: String,
}

impl From<StudentDoc> for Student {
    fn from(doc: StudentDoc) -> Self {
        Student {
            id: doc.student_id,
            parent_id: doc.parent_id,
            first_name: doc.first_name,
        }
    }
}

impl IntoIndexes for StudentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "student_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("student_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "parent_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("parent_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for StudentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
