//! Error types for the intake gateway
//!
//! Every failure that crosses a module boundary is a `GatewayError`. The
//! client-facing shape is the GraphQL-style envelope
//! `{"errors":[{"message", "extensions":{"code","status",...}}]}`.

use hyper::StatusCode;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;

/// Machine-readable error codes surfaced in `extensions.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthenticationRequired,
    AuthorizationFailed,
    NotFound,
    ValidationFailed,
    RateLimitExceeded,
    InternalError,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AuthorizationFailed => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::AuthorizationFailed => "AUTHORIZATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Not authorized: {0}")]
    AuthorizationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        /// Field name -> problem, for the caller to correct and resubmit
        fields: BTreeMap<String, String>,
    },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Validation error without field detail
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// `kind` with `id` does not exist, or is hidden from the caller
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", kind, id))
    }

    /// Validation error for a single field
    pub fn invalid_field(field: &str, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), problem.clone());
        Self::Validation {
            message: format!("{}: {}", field, problem),
            fields,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthenticationRequired => ErrorCode::AuthenticationRequired,
            Self::AuthorizationFailed(_) => ErrorCode::AuthorizationFailed,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            Self::Database(_) | Self::Config(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        self.code().status()
    }

    /// Client-facing message. Internal detail only leaves the process in dev mode.
    fn public_message(&self, dev_mode: bool) -> String {
        match self.code() {
            ErrorCode::InternalError if !dev_mode => "Internal server error".to_string(),
            ErrorCode::AuthorizationFailed => "Not authorized".to_string(),
            _ => self.to_string(),
        }
    }

    /// Render the `{errors:[{message, extensions}]}` envelope
    pub fn to_envelope(&self, dev_mode: bool) -> serde_json::Value {
        let code = self.code();
        let mut extensions = json!({
            "code": code,
            "status": code.status().as_u16(),
        });

        match self {
            Self::Validation { fields, .. } if !fields.is_empty() => {
                extensions["fields"] = json!(fields);
            }
            Self::RateLimitExceeded { retry_after_ms } => {
                extensions["retryAfterMs"] = json!(retry_after_ms);
            }
            Self::Database(_) | Self::Config(_) | Self::Internal(_) if dev_mode => {
                extensions["detail"] = json!(self.to_string());
            }
            _ => {}
        }

        json!({
            "errors": [{
                "message": self.public_message(dev_mode),
                "extensions": extensions,
            }]
        })
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for GatewayError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::oid::Error> for GatewayError {
    fn from(err: bson::oid::Error) -> Self {
        Self::NotFound(format!("Malformed identifier: {}", err))
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::AuthenticationRequired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::AuthorizationFailed("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::validation("bad").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            GatewayError::RateLimitExceeded { retry_after_ms: 10 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = GatewayError::AuthenticationRequired.to_envelope(false);
        let error = &envelope["errors"][0];
        assert_eq!(error["extensions"]["code"], "AUTHENTICATION_REQUIRED");
        assert_eq!(error["extensions"]["status"], 401);
    }

    #[test]
    fn test_internal_error_masked_in_production() {
        let err = GatewayError::Database("connection reset by peer at 10.0.0.4".into());

        let prod = err.to_envelope(false);
        assert_eq!(prod["errors"][0]["message"], "Internal server error");
        assert!(prod["errors"][0]["extensions"].get("detail").is_none());
        assert!(!prod.to_string().contains("10.0.0.4"));

        let dev = err.to_envelope(true);
        assert_eq!(dev["errors"][0]["extensions"]["code"], "INTERNAL_ERROR");
        assert!(dev.to_string().contains("10.0.0.4"));
    }

    #[test]
    fn test_validation_fields_included() {
        let err = GatewayError::invalid_field("studentId", "must not be empty");
        let envelope = err.to_envelope(false);
        assert_eq!(
            envelope["errors"][0]["extensions"]["fields"]["studentId"],
            "must not be empty"
        );
    }

    #[test]
    fn test_authorization_message_does_not_leak_reason() {
        let err = GatewayError::AuthorizationFailed("session owned by p2".into());
        let envelope = err.to_envelope(false);
        assert_eq!(envelope["errors"][0]["message"], "Not authorized");
    }
}
