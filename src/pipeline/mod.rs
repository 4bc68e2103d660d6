//! Request pipeline
//!
//! Every routed operation runs through [`RequestPipeline::run`]:
//!
//! 1. resolve the actor from the request credentials
//! 2. take a rate-limit token for that actor
//! 3. enforce the operation's [`AccessPolicy`]
//! 4. check access to the operation's target resource, if it names one
//! 5. execute
//! 6. write the operation's audit record (best effort)
//!
//! An operation cannot opt out of step 3: `policy()` has no default.

pub mod rate_limit;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntity, AuditLogger};
use crate::auth::{
    AccessibleResource, AuthorizationEngine, Permission, RequestCredentials, TokenAuthenticator,
};
use crate::types::{Actor, GatewayError, Result};

pub use rate_limit::{RateLimitConfig, RateLimiter, ANONYMOUS_KEY};

/// Role-level gate declared by each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// No actor needed
    Public,
    /// Any resolved actor
    Authenticated,
    /// Actor's role must grant this permission
    Permission(Permission),
    /// Actor's role must grant at least one of these
    AnyPermission(&'static [Permission]),
}

/// Write capabilities; the target check narrows them to a scope
pub const WRITE_PERMISSIONS: &[Permission] = &[
    Permission::WriteOwn,
    Permission::WriteAssigned,
    Permission::WriteAll,
];

/// Read capabilities
pub const READ_PERMISSIONS: &[Permission] = &[
    Permission::ReadOwn,
    Permission::ReadAssigned,
    Permission::ReadAll,
];

/// Per-request state handed to operations
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub actor: Option<Actor>,
}

impl RequestContext {
    pub fn new(actor: Option<Actor>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor,
        }
    }

    /// The actor, or `AUTHENTICATION_REQUIRED`
    pub fn require_actor(&self) -> Result<&Actor> {
        self.actor.as_ref().ok_or(GatewayError::AuthenticationRequired)
    }
}

/// Audit record produced by a successful operation
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn read(entity: AuditEntity) -> Self {
        Self {
            action: AuditAction::Read,
            entity,
            before: None,
            after: None,
        }
    }

    pub fn write(
        entity: AuditEntity,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            action: AuditAction::Write,
            entity,
            before,
            after,
        }
    }
}

/// A routed unit of work
#[async_trait]
pub trait Operation: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    fn policy(&self) -> AccessPolicy;

    /// Resource whose ownership must be checked before executing
    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        Ok(None)
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<Self::Output>;

    /// Answer for reads that should come back empty instead of failing
    /// when the caller is anonymous or not allowed
    fn fallback(&self) -> Option<Self::Output> {
        None
    }

    fn audit_record(&self, _output: &Self::Output) -> Option<AuditRecord> {
        None
    }
}

pub struct RequestPipeline {
    authenticator: TokenAuthenticator,
    engine: AuthorizationEngine,
    audit: AuditLogger,
    limiter: RateLimiter,
}

impl RequestPipeline {
    pub fn new(
        authenticator: TokenAuthenticator,
        engine: AuthorizationEngine,
        audit: AuditLogger,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            authenticator,
            engine,
            audit,
            limiter,
        }
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.authenticator
    }

    pub async fn run<O: Operation>(
        &self,
        credentials: &RequestCredentials,
        op: &O,
    ) -> Result<O::Output> {
        let actor = self.authenticator.authenticate(credentials).await;
        let ctx = RequestContext::new(actor);

        let key = ctx
            .actor
            .as_ref()
            .map(|a| a.id.as_str())
            .unwrap_or(ANONYMOUS_KEY);
        self.limiter.check(key)?;

        if let Err(e) = self.authorize(&ctx, op).await {
            let soft = matches!(
                e,
                GatewayError::AuthenticationRequired
                    | GatewayError::AuthorizationFailed(_)
                    | GatewayError::NotFound(_)
            );
            return match op.fallback() {
                Some(output) if soft => Ok(output),
                _ => Err(e),
            };
        }

        let output = op.execute(&ctx).await?;

        if let Some(record) = op.audit_record(&output) {
            self.audit
                .log_access(
                    ctx.actor.as_ref(),
                    record.action,
                    &record.entity,
                    record.before,
                    record.after,
                )
                .await;
        }

        debug!(request_id = %ctx.request_id, operation = op.name(), "Operation completed");
        Ok(output)
    }

    async fn authorize<O: Operation>(&self, ctx: &RequestContext, op: &O) -> Result<()> {
        let actor = ctx.actor.as_ref();

        let granted = match op.policy() {
            AccessPolicy::Public => true,
            AccessPolicy::Authenticated => {
                ctx.require_actor()?;
                true
            }
            AccessPolicy::Permission(permission) => {
                ctx.require_actor()?;
                self.engine.can(actor, permission)
            }
            AccessPolicy::AnyPermission(permissions) => {
                ctx.require_actor()?;
                permissions.iter().any(|p| self.engine.can(actor, *p))
            }
        };

        if !granted {
            warn!(
                request_id = %ctx.request_id,
                actor_id = actor.map(|a| a.id.as_str()).unwrap_or(ANONYMOUS_KEY),
                operation = op.name(),
                "Permission denied"
            );
            return Err(GatewayError::AuthorizationFailed(format!(
                "{} not permitted",
                op.name()
            )));
        }

        if let Some(resource) = op.target(ctx).await? {
            if !self.engine.can_access(actor, &resource).await {
                warn!(
                    request_id = %ctx.request_id,
                    actor_id = actor.map(|a| a.id.as_str()).unwrap_or(ANONYMOUS_KEY),
                    operation = op.name(),
                    resource = resource.kind(),
                    entity_id = %resource.entity().entity_id,
                    "Resource access denied"
                );
                // Reported like a missing resource so existence does not leak
                return Err(resource.hidden());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtValidator, Role, TokenInput};
    use crate::store::MemoryStore;
    use crate::types::Student;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        pipeline: RequestPipeline,
        validator: JwtValidator,
    }

    fn fixture(burst: u32) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert_actor(Actor::parent("p1", "p1@example.com", Some(Role::Parent)));
        store.insert_actor(Actor::parent("p2", "p2@example.com", Some(Role::Parent)));
        store.insert_actor(Actor::parent("nobody", "n@example.com", None));

        let validator = JwtValidator::new_dev();
        let audit = AuditLogger::new(store.clone());
        let pipeline = RequestPipeline::new(
            TokenAuthenticator::with_validator(Some(validator.clone()), store.clone(), audit.clone()),
            AuthorizationEngine::new(store.clone()),
            audit,
            RateLimiter::new(RateLimitConfig {
                burst,
                refill: Duration::from_secs(60),
            }),
        );

        Fixture {
            store,
            pipeline,
            validator,
        }
    }

    fn creds(validator: &JwtValidator, actor_id: &str) -> RequestCredentials {
        let token = validator
            .generate_token(TokenInput {
                actor_id: actor_id.into(),
                email: None,
            })
            .unwrap();
        RequestCredentials::new(Some(&format!("Bearer {}", token)), None)
    }

    /// Writes to a student owned by `owner`
    struct TouchStudent {
        owner: &'static str,
        executed: AtomicUsize,
        fallback: Option<&'static str>,
    }

    impl TouchStudent {
        fn owned_by(owner: &'static str) -> Self {
            Self {
                owner,
                executed: AtomicUsize::new(0),
                fallback: None,
            }
        }
    }

    #[async_trait]
    impl Operation for TouchStudent {
        type Output = &'static str;

        fn name(&self) -> &'static str {
            "touchStudent"
        }

        fn policy(&self) -> AccessPolicy {
            AccessPolicy::AnyPermission(WRITE_PERMISSIONS)
        }

        async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
            Ok(Some(AccessibleResource::Student(Student {
                id: "s1".into(),
                parent_id: self.owner.into(),
                first_name: "Ana".into(),
            })))
        }

        async fn execute(&self, _ctx: &RequestContext) -> Result<Self::Output> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok("done")
        }

        fn fallback(&self) -> Option<Self::Output> {
            self.fallback
        }

        fn audit_record(&self, _output: &Self::Output) -> Option<AuditRecord> {
            Some(AuditRecord::write(AuditEntity::new("Student", "s1"), None, None))
        }
    }

    struct Ping;

    #[async_trait]
    impl Operation for Ping {
        type Output = ();

        fn name(&self) -> &'static str {
            "ping"
        }

        fn policy(&self) -> AccessPolicy {
            AccessPolicy::Public
        }

        async fn execute(&self, _ctx: &RequestContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_anonymous_mutation_requires_authentication() {
        let f = fixture(10);
        let op = TouchStudent::owned_by("p1");

        let err = f
            .pipeline
            .run(&RequestCredentials::default(), &op)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRequired));
        assert_eq!(op.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_owner_executes_and_is_audited() {
        let f = fixture(10);
        let op = TouchStudent::owned_by("p1");

        assert_eq!(f.pipeline.run(&creds(&f.validator, "p1"), &op).await.unwrap(), "done");
        assert_eq!(op.executed.load(Ordering::SeqCst), 1);

        let actions: Vec<AuditAction> = f
            .store
            .audit_entries()
            .await
            .into_iter()
            .map(|e| e.action)
            .collect();
        // Identity verification, then the write
        assert_eq!(actions, vec![AuditAction::Read, AuditAction::Write]);
    }

    #[tokio::test]
    async fn test_other_parent_is_denied_before_execution() {
        let f = fixture(10);
        let op = TouchStudent::owned_by("p1");

        let err = f
            .pipeline
            .run(&creds(&f.validator, "p2"), &op)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), GatewayError::not_found("student", "s1").to_string());
        assert_eq!(op.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_roleless_actor_fails_permission_gate() {
        let f = fixture(10);
        let op = TouchStudent::owned_by("nobody");

        let err = f
            .pipeline
            .run(&creds(&f.validator, "nobody"), &op)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthorizationFailed(_)));
    }

    #[tokio::test]
    async fn test_fallback_replaces_soft_failures() {
        let f = fixture(10);
        let mut op = TouchStudent::owned_by("p1");
        op.fallback = Some("nothing");

        assert_eq!(
            f.pipeline.run(&RequestCredentials::default(), &op).await.unwrap(),
            "nothing"
        );
        assert_eq!(
            f.pipeline.run(&creds(&f.validator, "p2"), &op).await.unwrap(),
            "nothing"
        );
        assert_eq!(op.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_per_actor() {
        let f = fixture(2);
        let p1 = creds(&f.validator, "p1");

        assert!(f.pipeline.run(&p1, &Ping).await.is_ok());
        assert!(f.pipeline.run(&p1, &Ping).await.is_ok());
        assert!(matches!(
            f.pipeline.run(&p1, &Ping).await,
            Err(GatewayError::RateLimitExceeded { .. })
        ));

        // Separate buckets for other actors and for anonymous callers
        assert!(f.pipeline.run(&creds(&f.validator, "p2"), &Ping).await.is_ok());
        assert!(f.pipeline.run(&RequestCredentials::default(), &Ping).await.is_ok());
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_operation() {
        let f = fixture(10);
        f.store.fail_audit_writes(true);
        let op = TouchStudent::owned_by("p1");

        assert_eq!(f.pipeline.run(&creds(&f.validator, "p1"), &op).await.unwrap(), "done");
    }
}
