//! Liveness probe
//!
//! `/health` and `/healthz` return 200 whenever the process is serving.
//! Store and upstream reachability are not probed here.

use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::server::response::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// "development" or "production"
    pub mode: &'static str,
    pub timestamp: String,
    /// Completion source identifier
    pub upstream: String,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        mode: if state.dev_mode {
            "development"
        } else {
            "production"
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
        upstream: state.source.id().to_string(),
    }
}

pub fn health_check(state: &AppState) -> Response<BoxBody> {
    json_response(StatusCode::OK, &build_health_response(state))
}
