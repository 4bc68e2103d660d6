//! Database layer
//!
//! MongoDB storage for principals, students, onboarding sessions, intake
//! messages, appointments and the audit trail.

pub mod mongo;
pub mod schemas;
pub mod store;

pub use mongo::{MongoClient, MongoCollection};
pub use schemas::Metadata;
pub use store::MongoStore;
