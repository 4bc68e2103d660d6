//! HTTP server
//!
//! hyper http1 with TokioIo; one task per connection.

use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::response::{cors_preflight, not_found, BoxBody, BoxError};
use crate::audit::AuditLogger;
use crate::auth::{AuthConfig, AuthorizationEngine, TokenAuthenticator};
use crate::config::Args;
use crate::llm::CompletionSource;
use crate::pipeline::{RateLimitConfig, RateLimiter, RequestPipeline};
use crate::routes;
use crate::session::{SessionStateMachine, DEFAULT_MAX_STEP};
use crate::store::Stores;
use crate::stream::{IntakeStreamer, StreamLimits};
use crate::types::GatewayError;

/// Tunables for the shared state
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub dev_mode: bool,
    pub max_step: u32,
    pub stream_limits: StreamLimits,
    pub rate_limit: RateLimitConfig,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            max_step: DEFAULT_MAX_STEP,
            stream_limits: StreamLimits::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl From<&Args> for StateConfig {
    fn from(args: &Args) -> Self {
        Self {
            dev_mode: args.dev_mode,
            max_step: args.onboarding_max_step,
            stream_limits: args.stream_limits(),
            rate_limit: args.rate_limit(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub dev_mode: bool,
    pub stores: Stores,
    pub pipeline: RequestPipeline,
    pub sessions: SessionStateMachine,
    pub streamer: IntakeStreamer,
    pub source: Arc<dyn CompletionSource>,
}

impl AppState {
    pub fn new(
        config: StateConfig,
        auth: &AuthConfig,
        stores: Stores,
        source: Arc<dyn CompletionSource>,
    ) -> Self {
        let audit = AuditLogger::new(stores.audit.clone());

        let pipeline = RequestPipeline::new(
            TokenAuthenticator::new(auth, stores.actors.clone(), audit.clone()),
            AuthorizationEngine::new(stores.appointments.clone()),
            audit.clone(),
            RateLimiter::new(config.rate_limit),
        );

        Self {
            dev_mode: config.dev_mode,
            sessions: SessionStateMachine::new(stores.sessions.clone(), config.max_step),
            streamer: IntakeStreamer::new(stores.messages.clone(), audit, config.stream_limits),
            pipeline,
            stores,
            source,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(listen).await?;

    info!("Intake gateway listening on {}", listen);

    if state.dev_mode {
        warn!("Development mode enabled - internal error detail is exposed to clients");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, hyper::Error>(handle_request(state, addr, req).await) }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Connection from {} ended: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    info!("[{}] {} {}", addr, req.method(), req.uri().path());
    route(state, req).await
}

/// Dispatch a request to its handler
pub async fn route<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) | (&Method::GET, ["healthz"]) => {
            routes::health_check(&state)
        }

        (&Method::OPTIONS, _) => cors_preflight(),

        (&Method::POST, ["api", "sessions"]) => routes::start_session(state, req).await,

        (&Method::GET, ["api", "sessions", "current"]) => {
            routes::current_session(state, req).await
        }

        (&Method::POST, ["api", "sessions", id, action]) => {
            let id = id.to_string();
            match *action {
                "messages" => routes::post_message(state, req, &id).await,
                "stream" => routes::stream_reply(state, req, &id).await,
                other => match routes::parse_transition(other) {
                    Some(transition) => {
                        routes::transition_session(state, req, &id, transition).await
                    }
                    None => not_found(&path),
                },
            }
        }

        _ => not_found(&path),
    }
}
