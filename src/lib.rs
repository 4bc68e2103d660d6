//! Intake gateway
//!
//! Request trust boundary for the parent onboarding platform. Every call
//! is authenticated from a bearer credential, authorized against the
//! actor's role and the ownership chain of the resource it touches, and
//! recorded in an append-only audit trail. The intake assistant's replies
//! are streamed to the browser as server-push events and persisted only
//! once they are complete.

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod llm;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatewayError, Result};
