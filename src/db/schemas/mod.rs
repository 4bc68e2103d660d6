//! MongoDB document structures

mod appointment;
mod audit_log;
mod message;
mod metadata;
mod parent;
mod session;
mod student;

pub use appointment::{AppointmentDoc, APPOINTMENT_COLLECTION};
pub use audit_log::{AuditLogDoc, AUDIT_LOG_COLLECTION};
pub use message::{MessageDoc, MESSAGE_COLLECTION};
pub use metadata::Metadata;
pub use parent::{ParentDoc, PARENT_COLLECTION};
pub use session::{SessionDoc, SESSION_COLLECTION};
pub use student::{StudentDoc, STUDENT_COLLECTION};
