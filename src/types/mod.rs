//! Shared types for the intake gateway

pub mod error;
pub mod model;

pub use error::{ErrorCode, GatewayError, Result};
pub use model::{
    Actor, ActorKind, Appointment, IntakeMessage, MessageRole, OnboardingSession, SessionStatus,
    Student,
};
