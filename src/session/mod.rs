//! Onboarding session lifecycle
//!
//! `draft -> active -> completed`, with `active -> abandoned` as the other
//! terminal edge. The machine owns the step counter and the status; what a
//! step means is up to the caller.
//!
//! Invalid transitions are not errors: the session comes back unchanged and
//! the attempt is logged. Mutations of one session, and creation for one
//! (parent, student) pair, are serialized through a keyed async mutex.

mod lock;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::SessionStore;
use crate::types::{GatewayError, OnboardingSession, Result, SessionStatus};

use lock::KeyedLocks;

/// Default number of onboarding steps
pub const DEFAULT_MAX_STEP: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance,
    Activate,
    Complete,
    Abandon,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Advance => "advance",
            Transition::Activate => "activate",
            Transition::Complete => "complete",
            Transition::Abandon => "abandon",
        }
    }
}

/// Apply a transition in place. Returns false (and leaves the session
/// untouched) when the transition is not allowed from the current state.
pub fn apply_transition(
    session: &mut OnboardingSession,
    transition: Transition,
    max_step: u32,
    now: DateTime<Utc>,
) -> bool {
    let changed = match (transition, session.status) {
        (Transition::Advance, SessionStatus::Active) => {
            let next = session.current_step.saturating_add(1).min(max_step);
            let moved = next != session.current_step;
            session.current_step = next;
            moved
        }
        (Transition::Activate, SessionStatus::Draft) => {
            session.status = SessionStatus::Active;
            true
        }
        (Transition::Complete, SessionStatus::Active) => {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(now);
            true
        }
        (Transition::Abandon, SessionStatus::Active) => {
            session.status = SessionStatus::Abandoned;
            true
        }
        _ => false,
    };

    if changed {
        session.updated_at = now;
    }
    changed
}

/// Result of [`SessionStateMachine::start_or_resume`]
#[derive(Debug, Clone)]
pub enum Started {
    Created(OnboardingSession),
    Resumed(OnboardingSession),
}

impl Started {
    pub fn session(&self) -> &OnboardingSession {
        match self {
            Started::Created(s) | Started::Resumed(s) => s,
        }
    }

    pub fn into_session(self) -> OnboardingSession {
        match self {
            Started::Created(s) | Started::Resumed(s) => s,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Started::Created(_))
    }
}

/// Session state before and after a transition attempt
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub before: OnboardingSession,
    pub after: OnboardingSession,
}

impl TransitionOutcome {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

pub struct SessionStateMachine {
    store: Arc<dyn SessionStore>,
    max_step: u32,
    locks: KeyedLocks,
}

impl SessionStateMachine {
    pub fn new(store: Arc<dyn SessionStore>, max_step: u32) -> Self {
        Self {
            store,
            max_step: max_step.max(1),
            locks: KeyedLocks::default(),
        }
    }

    pub fn max_step(&self) -> u32 {
        self.max_step
    }

    /// Return the active session for the pair, or create one at step 1
    pub async fn start_or_resume(&self, parent_id: &str, student_id: &str) -> Result<Started> {
        let _guard = self
            .locks
            .lock(format!("pair:{}:{}", parent_id, student_id))
            .await;

        if let Some(existing) = self.store.find_active_session(parent_id, student_id).await? {
            debug!(session_id = %existing.id, parent_id, student_id, "Resuming onboarding session");
            return Ok(Started::Resumed(existing));
        }

        let session = OnboardingSession::new(parent_id, student_id, SessionStatus::Active);
        self.store.insert_session(&session).await?;

        info!(session_id = %session.id, parent_id, student_id, "Onboarding session started");
        Ok(Started::Created(session))
    }

    pub async fn advance(&self, session_id: Uuid) -> Result<TransitionOutcome> {
        self.transition(session_id, Transition::Advance).await
    }

    pub async fn activate(&self, session_id: Uuid) -> Result<TransitionOutcome> {
        self.transition(session_id, Transition::Activate).await
    }

    pub async fn complete(&self, session_id: Uuid) -> Result<TransitionOutcome> {
        self.transition(session_id, Transition::Complete).await
    }

    pub async fn abandon(&self, session_id: Uuid) -> Result<TransitionOutcome> {
        self.transition(session_id, Transition::Abandon).await
    }

    /// Load, transition and persist one session under its lock
    pub async fn transition(
        &self,
        session_id: Uuid,
        transition: Transition,
    ) -> Result<TransitionOutcome> {
        let _guard = self.locks.lock(format!("session:{}", session_id)).await;

        let before = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| GatewayError::not_found("session", session_id))?;

        let mut after = before.clone();
        if apply_transition(&mut after, transition, self.max_step, Utc::now()) {
            self.store.update_session(&after).await?;
            debug!(
                %session_id,
                transition = transition.as_str(),
                status = %after.status,
                step = after.current_step,
                "Session transitioned"
            );
        } else {
            info!(
                %session_id,
                transition = transition.as_str(),
                status = %before.status,
                step = before.current_step,
                "Transition not applied; session unchanged"
            );
        }

        Ok(TransitionOutcome { before, after })
    }
}
