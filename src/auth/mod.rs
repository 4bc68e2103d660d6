//! Authentication and authorization

pub mod access;
pub mod authenticator;
pub mod jwt;
pub mod permissions;
pub mod secret;

pub use access::{AccessibleResource, AuthorizationEngine};
pub use authenticator::{AuthFailure, RequestCredentials, TokenAuthenticator};
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenError, TokenInput};
pub use permissions::{can, role_permissions, Permission, Role};
pub use secret::{AuthConfig, DirSecretStore, SecretSource, SecretStore};
