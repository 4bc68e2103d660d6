//! Bearer credential resolution
//!
//! [`TokenAuthenticator::authenticate`] never fails to the caller: every
//! rejection collapses into `None`. The reason is only visible in the
//! `reason` field of the log event.

use hyper::header::AUTHORIZATION;
use hyper::Request;
use std::sync::Arc;
use tracing::{debug, warn};

use super::jwt::{extract_token_from_header, JwtValidator, TokenError};
use super::secret::AuthConfig;
use crate::audit::AuditLogger;
use crate::store::ActorStore;
use crate::types::Actor;

/// Query parameters checked, in order, when no bearer header is present
pub const TOKEN_PARAMS: [&str; 3] = ["token", "auth_token", "access_token"];

/// The credential-bearing parts of an inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    authorization: Option<String>,
    params: Vec<(String, String)>,
}

impl RequestCredentials {
    pub fn new(authorization: Option<&str>, query: Option<&str>) -> Self {
        let params = query
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();

        Self {
            authorization: authorization.map(str::to_string),
            params,
        }
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Self::new(authorization, req.uri().query())
    }

    /// Bearer header first, then the first non-empty token parameter
    pub fn token(&self) -> Option<&str> {
        if let Some(token) = extract_token_from_header(self.authorization.as_deref()) {
            return Some(token);
        }

        TOKEN_PARAMS.iter().find_map(|name| {
            self.params
                .iter()
                .find(|(k, v)| k == name && !v.trim().is_empty())
                .map(|(_, v)| v.trim())
        })
    }
}

/// Why a credential did not resolve to an actor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no credential presented")]
    NoCredential,
    #[error("no signing secret configured")]
    NoSecret,
    #[error("token rejected: {0}")]
    Token(#[from] TokenError),
    #[error("actor not found")]
    ActorNotFound,
    #[error("actor lookup failed: {0}")]
    Lookup(String),
}

/// Resolves request credentials to an [`Actor`]
#[derive(Clone)]
pub struct TokenAuthenticator {
    validator: Option<JwtValidator>,
    actors: Arc<dyn ActorStore>,
    audit: AuditLogger,
}

impl TokenAuthenticator {
    /// Build from explicit configuration. The secret is resolved here, once.
    pub fn new(config: &AuthConfig, actors: Arc<dyn ActorStore>, audit: AuditLogger) -> Self {
        Self {
            validator: config.build_validator(),
            actors,
            audit,
        }
    }

    pub fn with_validator(
        validator: Option<JwtValidator>,
        actors: Arc<dyn ActorStore>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            validator,
            actors,
            audit,
        }
    }

    pub fn validator(&self) -> Option<&JwtValidator> {
        self.validator.as_ref()
    }

    /// Resolve the actor, or `None` on any failure
    pub async fn authenticate(&self, credentials: &RequestCredentials) -> Option<Actor> {
        match self.resolve(credentials).await {
            Ok(actor) => {
                debug!(actor_id = %actor.id, "Authenticated");
                self.audit.log_read(Some(&actor), &(&actor).into()).await;
                Some(actor)
            }
            Err(AuthFailure::NoCredential) => None,
            Err(failure @ (AuthFailure::NoSecret | AuthFailure::Lookup(_))) => {
                warn!(reason = %failure, "Authentication failed");
                None
            }
            Err(failure) => {
                debug!(reason = %failure, "Authentication failed");
                None
            }
        }
    }

    /// Resolution with the failure reason kept
    pub async fn resolve(&self, credentials: &RequestCredentials) -> Result<Actor, AuthFailure> {
        let token = credentials.token().ok_or(AuthFailure::NoCredential)?;
        let validator = self.validator.as_ref().ok_or(AuthFailure::NoSecret)?;

        let claims = validator.verify_token(token)?;

        self.actors
            .find_actor(&claims.actor_id)
            .await
            .map_err(|e| AuthFailure::Lookup(e.to_string()))?
            .ok_or(AuthFailure::ActorNotFound)
    }
}
