//! Shared fixture: an in-memory gateway driven through the router

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use intake_gateway::auth::{AuthConfig, JwtValidator, Role, TokenInput};
use intake_gateway::llm::ScriptedSource;
use intake_gateway::pipeline::RateLimitConfig;
use intake_gateway::server::{self, AppState, BoxBody, StateConfig};
use intake_gateway::store::{MemoryStore, Stores};
use intake_gateway::stream::StreamLimits;
use intake_gateway::types::{Actor, Appointment, Student};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
    pub validator: JwtValidator,
}

pub struct HarnessBuilder {
    source: ScriptedSource,
    config: StateConfig,
}

impl HarnessBuilder {
    pub fn source(mut self, source: ScriptedSource) -> Self {
        self.source = source;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.config.rate_limit = RateLimitConfig {
            burst,
            refill: Duration::from_secs(60),
        };
        self
    }

    pub fn stream_limits(mut self, limits: StreamLimits) -> Self {
        self.config.stream_limits = limits;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::seeded_for_dev());
        seed(&store);

        // Dev mode resolves the fixed development secret
        let auth = AuthConfig::new(true, 3600);
        let state = Arc::new(AppState::new(
            self.config,
            &auth,
            Stores::from_backend(store.clone()),
            Arc::new(self.source),
        ));

        Harness {
            store,
            state,
            validator: JwtValidator::new_dev(),
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        source: ScriptedSource::new(["Hel", "lo"]),
        config: StateConfig {
            dev_mode: true,
            ..StateConfig::default()
        },
    }
}

/// p1 owns st1, p2 owns st2, t1 is booked with st1 only
fn seed(store: &MemoryStore) {
    store.insert_actor(Actor::parent("p1", "p1@example.com", Some(Role::Parent)));
    store.insert_actor(Actor::parent("p2", "p2@example.com", Some(Role::Parent)));
    store.insert_actor(Actor::parent("s1", "staff@example.com", Some(Role::Staff)));
    store.insert_actor(Actor::parent("t1", "t1@example.com", Some(Role::Therapist)));
    store.insert_actor(Actor::parent("a1", "admin@example.com", Some(Role::Admin)));

    store.insert_student(Student {
        id: "st1".into(),
        parent_id: "p1".into(),
        first_name: "Ana".into(),
    });
    store.insert_student(Student {
        id: "st2".into(),
        parent_id: "p2".into(),
        first_name: "Ben".into(),
    });
    store.insert_appointment(Appointment {
        id: "ap1".into(),
        student_id: "st1".into(),
        therapist_id: "t1".into(),
        session_id: None,
    });
}

impl Harness {
    pub fn token(&self, actor_id: &str) -> String {
        self.validator
            .generate_token(TokenInput {
                actor_id: actor_id.into(),
                email: None,
            })
            .unwrap()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> Response<BoxBody> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("authorization", format!("Bearer {}", self.token(actor)));
        }
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let req = builder.body(Full::new(Bytes::from(body))).unwrap();
        server::route(Arc::clone(&self.state), req).await
    }

    /// Send and decode a JSON response
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(method, uri, actor, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Start (or resume) st1's session as p1 and return its id
    pub async fn start_session(&self, actor: &str, student_id: &str) -> String {
        let (status, json) = self
            .call(
                Method::POST,
                "/api/sessions",
                Some(actor),
                Some(serde_json::json!({ "studentId": student_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "start failed: {}", json);
        json["data"]["id"].as_str().unwrap().to_string()
    }

    pub async fn post_message(&self, actor: &str, session_id: &str, content: &str) -> String {
        let (status, json) = self
            .call(
                Method::POST,
                &format!("/api/sessions/{}/messages", session_id),
                Some(actor),
                Some(serde_json::json!({ "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "post failed: {}", json);
        json["data"]["id"].as_str().unwrap().to_string()
    }
}

pub fn error_code(json: &Value) -> &str {
    json["errors"][0]["extensions"]["code"].as_str().unwrap_or("")
}
