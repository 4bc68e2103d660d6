//! Signing secret resolution
//!
//! The secret is resolved once, at construction time, from (in order) the
//! secrets store, the `JWT_SECRET` environment value, and only in dev mode a
//! fixed development fallback. When nothing resolves, no validator is built
//! and every token is rejected.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::auth::jwt::{JwtValidator, DEV_FALLBACK_SECRET};

/// Name of the signing secret inside the secrets store
pub const JWT_SECRET_NAME: &str = "jwt_secret";

/// A named-secret lookup
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Secrets mounted as files in a directory (`<dir>/<name>`)
#[derive(Debug, Clone)]
pub struct DirSecretStore {
    dir: PathBuf,
}

impl DirSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretStore for DirSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        let path = self.dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let value = contents.trim().to_string();
                (!value.is_empty()).then_some(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read secret file");
                None
            }
        }
    }
}

/// Where the signing secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    SecretsStore,
    Environment,
    DevFallback,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::SecretsStore => write!(f, "secrets store"),
            SecretSource::Environment => write!(f, "environment"),
            SecretSource::DevFallback => write!(f, "development fallback"),
        }
    }
}

pub struct ResolvedSecret {
    pub value: Zeroizing<String>,
    pub source: SecretSource,
}

/// Explicit authentication configuration handed to the authenticator
#[derive(Clone)]
pub struct AuthConfig {
    store: Option<Arc<dyn SecretStore>>,
    env_secret: Option<String>,
    dev_mode: bool,
    expiry_seconds: u64,
}

impl AuthConfig {
    pub fn new(dev_mode: bool, expiry_seconds: u64) -> Self {
        Self {
            store: None,
            env_secret: None,
            dev_mode,
            expiry_seconds,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_env_secret(mut self, secret: Option<String>) -> Self {
        self.env_secret = secret.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub fn expiry_seconds(&self) -> u64 {
        self.expiry_seconds
    }

    /// Resolve the secret in priority order
    pub fn resolve_secret(&self) -> Option<ResolvedSecret> {
        if let Some(value) = self.store.as_ref().and_then(|s| s.get(JWT_SECRET_NAME)) {
            return Some(ResolvedSecret {
                value: Zeroizing::new(value),
                source: SecretSource::SecretsStore,
            });
        }

        if let Some(value) = self.env_secret.clone() {
            return Some(ResolvedSecret {
                value: Zeroizing::new(value),
                source: SecretSource::Environment,
            });
        }

        if self.dev_mode {
            return Some(ResolvedSecret {
                value: Zeroizing::new(DEV_FALLBACK_SECRET.to_string()),
                source: SecretSource::DevFallback,
            });
        }

        None
    }

    /// Build the validator, or `None` when no usable secret exists.
    pub fn build_validator(&self) -> Option<JwtValidator> {
        let Some(resolved) = self.resolve_secret() else {
            error!("No JWT secret configured - every token will be rejected");
            return None;
        };

        if resolved.source == SecretSource::DevFallback {
            warn!("Using the insecure development JWT secret (dev mode)");
            return Some(JwtValidator::new_dev().with_expiry(self.expiry_seconds));
        }

        match JwtValidator::new(resolved.value.as_str(), self.expiry_seconds) {
            Ok(validator) => {
                info!(source = %resolved.source, "JWT secret resolved");
                Some(validator)
            }
            Err(e) => {
                error!(source = %resolved.source, error = %e, "Rejected JWT secret - every token will be rejected");
                None
            }
        }
    }
}
