//! Onboarding session routes
//!
//! - `POST /api/sessions` `{studentId}` start or resume
//! - `GET /api/sessions/current?studentId=` current session or `null`
//! - `POST /api/sessions/{id}/advance|complete|abandon`
//! - `POST /api/sessions/{id}/messages` `{content}`
//!
//! Each handler builds an [`Operation`] and hands it to the request
//! pipeline. Request bodies are collected up front but only decoded once
//! the caller has passed the policy gate.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::respond;
use crate::audit::AuditEntity;
use crate::auth::{AccessibleResource, RequestCredentials};
use crate::pipeline::{
    AccessPolicy, AuditRecord, Operation, RequestContext, READ_PERMISSIONS, WRITE_PERMISSIONS,
};
use crate::server::response::{decode_json, error_response, read_body, BoxBody, BoxError};
use crate::server::AppState;
use crate::session::{Started, Transition, TransitionOutcome};
use crate::types::{
    GatewayError, IntakeMessage, MessageRole, OnboardingSession, Result, SessionStatus, Student,
};

/// Longest accepted user message, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Lazily loaded session named by a path segment
pub(crate) struct SessionRef {
    state: Arc<AppState>,
    raw_id: String,
    session: OnceCell<OnboardingSession>,
}

impl SessionRef {
    pub(crate) fn new(state: Arc<AppState>, raw_id: &str) -> Self {
        Self {
            state,
            raw_id: raw_id.to_string(),
            session: OnceCell::new(),
        }
    }

    /// Malformed ids read as missing sessions
    pub(crate) fn id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.raw_id)
            .map_err(|_| GatewayError::not_found("session", &self.raw_id))
    }

    pub(crate) async fn load(&self) -> Result<&OnboardingSession> {
        self.session
            .get_or_try_init(|| async {
                let id = self.id()?;
                self.state
                    .stores
                    .sessions
                    .find_session(id)
                    .await?
                    .ok_or_else(|| GatewayError::not_found("session", id))
            })
            .await
    }

    pub(crate) async fn resource(&self) -> Result<Option<AccessibleResource>> {
        Ok(Some(AccessibleResource::OnboardingSession(
            self.load().await?.clone(),
        )))
    }

    pub(crate) fn state(&self) -> &AppState {
        &self.state
    }
}

// ============================================================================
// Start or resume
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionInput {
    pub student_id: String,
}

pub struct StartSession {
    state: Arc<AppState>,
    body: Bytes,
    student: OnceCell<Student>,
}

impl StartSession {
    pub fn new(state: Arc<AppState>, body: Bytes) -> Self {
        Self {
            state,
            body,
            student: OnceCell::new(),
        }
    }

    async fn student(&self) -> Result<&Student> {
        self.student
            .get_or_try_init(|| async {
                let input: StartSessionInput = decode_json(&self.body)?;
                let student_id = input.student_id.trim();
                if student_id.is_empty() {
                    return Err(GatewayError::invalid_field("studentId", "is required"));
                }

                self.state
                    .stores
                    .students
                    .find_student(student_id)
                    .await?
                    .ok_or_else(|| GatewayError::not_found("student", student_id))
            })
            .await
    }
}

#[async_trait]
impl Operation for StartSession {
    type Output = Started;

    fn name(&self) -> &'static str {
        "startOnboardingSession"
    }

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::AnyPermission(WRITE_PERMISSIONS)
    }

    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        Ok(Some(AccessibleResource::Student(self.student().await?.clone())))
    }

    async fn execute(&self, _ctx: &RequestContext) -> Result<Started> {
        let student = self.student().await?;
        self.state
            .sessions
            .start_or_resume(&student.parent_id, &student.id)
            .await
    }

    fn audit_record(&self, output: &Started) -> Option<AuditRecord> {
        let session = output.session();
        Some(if output.is_created() {
            AuditRecord::write(session.into(), None, serde_json::to_value(session).ok())
        } else {
            AuditRecord::read(session.into())
        })
    }
}

pub async fn start_session<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let credentials = RequestCredentials::from_request(&req);
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e, state.dev_mode),
    };

    let op = StartSession::new(Arc::clone(&state), body);
    let result = state.pipeline.run(&credentials, &op).await;
    respond(&state, result.map(Started::into_session))
}

// ============================================================================
// Current session
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentSessionQuery {
    student_id: Option<String>,
}

pub struct CurrentSession {
    state: Arc<AppState>,
    student_id: Option<String>,
    student: OnceCell<Option<Student>>,
}

impl CurrentSession {
    pub fn new(state: Arc<AppState>, student_id: Option<String>) -> Self {
        Self {
            state,
            student_id,
            student: OnceCell::new(),
        }
    }

    async fn student(&self) -> Result<Option<&Student>> {
        let student = self
            .student
            .get_or_try_init(|| async {
                let student_id = self
                    .student_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| GatewayError::invalid_field("studentId", "is required"))?;
                self.state.stores.students.find_student(student_id).await
            })
            .await?;
        Ok(student.as_ref())
    }
}

#[async_trait]
impl Operation for CurrentSession {
    type Output = Option<OnboardingSession>;

    fn name(&self) -> &'static str {
        "currentOnboardingSession"
    }

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::AnyPermission(READ_PERMISSIONS)
    }

    /// A missing student has nothing to protect; execution then finds no session
    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        Ok(self
            .student()
            .await?
            .map(|s| AccessibleResource::Student(s.clone())))
    }

    async fn execute(&self, _ctx: &RequestContext) -> Result<Self::Output> {
        match self.student().await? {
            Some(student) => {
                self.state
                    .stores
                    .sessions
                    .find_active_session(&student.parent_id, &student.id)
                    .await
            }
            None => Ok(None),
        }
    }

    fn fallback(&self) -> Option<Self::Output> {
        Some(None)
    }

    fn audit_record(&self, output: &Self::Output) -> Option<AuditRecord> {
        output.as_ref().map(|s| AuditRecord::read(s.into()))
    }
}

pub async fn current_session<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody> {
    let credentials = RequestCredentials::from_request(&req);
    let query: CurrentSessionQuery = req
        .uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let op = CurrentSession::new(Arc::clone(&state), query.student_id);
    let result = state.pipeline.run(&credentials, &op).await;
    respond(&state, result)
}

// ============================================================================
// Transitions
// ============================================================================

pub struct TransitionSession {
    session: SessionRef,
    transition: Transition,
}

impl TransitionSession {
    pub fn new(state: Arc<AppState>, session_id: &str, transition: Transition) -> Self {
        Self {
            session: SessionRef::new(state, session_id),
            transition,
        }
    }
}

#[async_trait]
impl Operation for TransitionSession {
    type Output = TransitionOutcome;

    fn name(&self) -> &'static str {
        match self.transition {
            Transition::Advance => "advanceOnboardingSession",
            Transition::Activate => "activateOnboardingSession",
            Transition::Complete => "completeOnboardingSession",
            Transition::Abandon => "abandonOnboardingSession",
        }
    }

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::AnyPermission(WRITE_PERMISSIONS)
    }

    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        self.session.resource().await
    }

    async fn execute(&self, _ctx: &RequestContext) -> Result<TransitionOutcome> {
        self.session
            .state()
            .sessions
            .transition(self.session.id()?, self.transition)
            .await
    }

    fn audit_record(&self, output: &TransitionOutcome) -> Option<AuditRecord> {
        if !output.changed() {
            return None;
        }
        Some(AuditRecord::write(
            (&output.after).into(),
            serde_json::to_value(&output.before).ok(),
            serde_json::to_value(&output.after).ok(),
        ))
    }
}

pub fn parse_transition(action: &str) -> Option<Transition> {
    match action {
        "advance" => Some(Transition::Advance),
        "complete" => Some(Transition::Complete),
        "abandon" => Some(Transition::Abandon),
        _ => None,
    }
}

pub async fn transition_session<B>(
    state: Arc<AppState>,
    req: Request<B>,
    session_id: &str,
    transition: Transition,
) -> Response<BoxBody> {
    let credentials = RequestCredentials::from_request(&req);
    let op = TransitionSession::new(Arc::clone(&state), session_id, transition);
    let result = state.pipeline.run(&credentials, &op).await;
    respond(&state, result.map(|outcome| outcome.after))
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PostMessageInput {
    pub content: String,
}

pub fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::invalid_field("content", "must not be blank"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(GatewayError::invalid_field(
            "content",
            format!("must be at most {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(trimmed)
}

pub struct PostMessage {
    session: SessionRef,
    body: Bytes,
}

impl PostMessage {
    pub fn new(state: Arc<AppState>, session_id: &str, body: Bytes) -> Self {
        Self {
            session: SessionRef::new(state, session_id),
            body,
        }
    }
}

#[async_trait]
impl Operation for PostMessage {
    type Output = IntakeMessage;

    fn name(&self) -> &'static str {
        "postIntakeMessage"
    }

    fn policy(&self) -> AccessPolicy {
        AccessPolicy::AnyPermission(WRITE_PERMISSIONS)
    }

    async fn target(&self, _ctx: &RequestContext) -> Result<Option<AccessibleResource>> {
        self.session.resource().await
    }

    async fn execute(&self, _ctx: &RequestContext) -> Result<IntakeMessage> {
        let input: PostMessageInput = decode_json(&self.body)?;
        let content = validate_content(&input.content)?;

        let session = self.session.load().await?;
        if session.status != SessionStatus::Active {
            return Err(GatewayError::invalid_field(
                "session",
                format!("is {}, not active", session.status),
            ));
        }

        let message = IntakeMessage::new(session.id, MessageRole::User, content);
        self.session
            .state()
            .stores
            .messages
            .insert_message(&message)
            .await?;
        Ok(message)
    }

    fn audit_record(&self, output: &IntakeMessage) -> Option<AuditRecord> {
        Some(AuditRecord::write(
            AuditEntity::from(output),
            None,
            serde_json::to_value(output).ok(),
        ))
    }
}

pub async fn post_message<B>(
    state: Arc<AppState>,
    req: Request<B>,
    session_id: &str,
) -> Response<BoxBody>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let credentials = RequestCredentials::from_request(&req);
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e, state.dev_mode),
    };

    let op = PostMessage::new(Arc::clone(&state), session_id, body);
    let result = state.pipeline.run(&credentials, &op).await;
    respond(&state, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_trims_and_bounds() {
        assert_eq!(validate_content("  hello \n").unwrap(), "hello");
        assert!(validate_content("   ").is_err());

        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        match validate_content(&long) {
            Err(GatewayError::Validation { fields, .. }) => assert!(fields.contains_key("content")),
            other => panic!("expected validation error, got {:?}", other),
        }

        // Counted in characters, not bytes
        let wide = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_content(&wide).is_ok());
    }

    #[test]
    fn test_parse_transition_only_routes_client_actions() {
        assert_eq!(parse_transition("advance"), Some(Transition::Advance));
        assert_eq!(parse_transition("complete"), Some(Transition::Complete));
        assert_eq!(parse_transition("abandon"), Some(Transition::Abandon));
        assert_eq!(parse_transition("activate"), None);
        assert_eq!(parse_transition("delete"), None);
    }
}
