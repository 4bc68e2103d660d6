//! JWT handling for actor credentials
//!
//! Tokens are HS256 claim-sets carrying at least an actor identifier
//! (`actor_id`, also accepted as `parent_id`). Expiry is enforced when the
//! `exp` claim is present.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

use crate::types::GatewayError;

/// Minimum accepted secret length for production secrets
pub const MIN_SECRET_LEN: usize = 32;

/// Development-only signing secret. Never used unless dev mode is on.
pub(crate) const DEV_FALLBACK_SECRET: &str = "dev-mode-intake-secret-not-for-production-use";

/// Payload stored in the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Actor identifier
    #[serde(default, alias = "parent_id", skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Claims that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub actor_id: String,
    pub exp: Option<u64>,
}

/// Input for minting a token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub actor_id: String,
    pub email: Option<String>,
}

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    BadSignature,
    #[error("malformed token")]
    Malformed,
    #[error("missing actor identifier claim")]
    MissingActorId,
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: Zeroizing<String>,
    expiry_seconds: u64,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("expiry_seconds", &self.expiry_seconds)
            .finish_non_exhaustive()
    }
}

impl JwtValidator {
    /// Create a validator from a production secret.
    ///
    /// Returns an error if the secret is empty or too short.
    pub fn new(secret: impl Into<String>, expiry_seconds: u64) -> Result<Self, GatewayError> {
        let secret = Zeroizing::new(secret.into());

        if secret.is_empty() {
            return Err(GatewayError::Config("JWT secret is empty".into()));
        }

        if secret.len() < MIN_SECRET_LEN {
            return Err(GatewayError::Config(format!(
                "JWT secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Validator backed by the fixed development secret
    pub fn new_dev() -> Self {
        Self {
            secret: Zeroizing::new(DEV_FALLBACK_SECRET.to_string()),
            expiry_seconds: 3600,
        }
    }

    /// Lifetime of tokens minted from here on
    pub fn with_expiry(mut self, expiry_seconds: u64) -> Self {
        self.expiry_seconds = expiry_seconds;
        self
    }

    /// Mint a token for an actor
    pub fn generate_token(&self, input: TokenInput) -> Result<String, GatewayError> {
        let now = unix_now()?;

        let claims = Claims {
            actor_id: Some(input.actor_id),
            email: input.email,
            iat: Some(now),
            exp: Some(now + self.expiry_seconds),
        };

        self.sign(&claims)
    }

    /// Sign an arbitrary claim-set
    pub fn sign(&self, claims: &Claims) -> Result<String, GatewayError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GatewayError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a token
    pub fn verify_token(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::BadSignature
                }
                _ => TokenError::Malformed,
            }
        })?;

        let actor_id = data
            .claims
            .actor_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(TokenError::MissingActorId)?;

        Ok(VerifiedClaims {
            actor_id,
            exp: data.claims.exp,
        })
    }
}

fn unix_now() -> Result<u64, GatewayError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| GatewayError::Internal(format!("System time error: {}", e)))
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?.trim();
    let (scheme, token) = header.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
