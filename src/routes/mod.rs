//! HTTP routes for the intake gateway

pub mod health;
pub mod intake_stream;
pub mod sessions;

use hyper::Response;
use serde::Serialize;
use tracing::error;

use crate::server::response::{data_response, error_response, BoxBody};
use crate::server::AppState;
use crate::types::{ErrorCode, Result};

pub use health::health_check;
pub use intake_stream::stream_reply;
pub use sessions::{
    current_session, parse_transition, post_message, start_session, transition_session,
};

/// Render an operation result as `{"data"}` or `{"errors"}`
pub(crate) fn respond<T: Serialize>(state: &AppState, result: Result<T>) -> Response<BoxBody> {
    match result {
        Ok(value) => data_response(&value),
        Err(e) => {
            if e.code() == ErrorCode::InternalError {
                error!(error = %e, "Request failed");
            }
            error_response(&e, state.dev_mode)
        }
    }
}
