//! HTTP server module

pub mod http;
pub mod response;

pub use http::{route, run, AppState, StateConfig};
pub use response::BoxBody;
