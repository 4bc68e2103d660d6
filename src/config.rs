//! Configuration for the intake gateway
//!
//! CLI arguments and environment variables using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthConfig, DirSecretStore};
use crate::pipeline::RateLimitConfig;
use crate::session::DEFAULT_MAX_STEP;
use crate::stream::StreamLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Intake gateway - trust boundary for parent onboarding
#[derive(Parser, Debug, Clone)]
#[command(name = "intake-gateway")]
#[command(about = "Authenticated, audited API and intake chat stream for parent onboarding")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Development mode (fallback JWT secret, in-memory stores, verbose errors)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI (required outside dev mode)
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "intake")]
    pub mongodb_db: String,

    /// JWT signing secret
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Directory of mounted secrets; `jwt_secret` there wins over JWT_SECRET
    #[arg(long, env = "SECRETS_DIR")]
    pub secrets_dir: Option<PathBuf>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Append audit entries to this JSONL file instead of the database
    #[arg(long, env = "AUDIT_LOG_PATH")]
    pub audit_log_path: Option<PathBuf>,

    /// Number of onboarding steps
    #[arg(long, env = "ONBOARDING_MAX_STEP", default_value_t = DEFAULT_MAX_STEP)]
    pub onboarding_max_step: u32,

    /// Longest upstream silence during a stream, in milliseconds
    #[arg(long, env = "STREAM_IDLE_TIMEOUT_MS", default_value = "30000")]
    pub stream_idle_timeout_ms: u64,

    /// Upper bound on a whole stream, in milliseconds
    #[arg(long, env = "STREAM_TOTAL_TIMEOUT_MS", default_value = "180000")]
    pub stream_total_timeout_ms: u64,

    /// Requests an actor may make back to back
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "60")]
    pub rate_limit_burst: u32,

    /// Milliseconds to regain one request
    #[arg(long, env = "RATE_LIMIT_REFILL_MS", default_value = "1000")]
    pub rate_limit_refill_ms: u64,

    /// OpenAI-compatible completion endpoint; scripted replies when unset in dev mode
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Model name sent upstream
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    /// API key for the completion endpoint
    #[arg(long, env = "LLM_API_KEY")]
    pub llm_api_key: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.onboarding_max_step < 1 {
            return Err("ONBOARDING_MAX_STEP must be at least 1".to_string());
        }

        if self.stream_idle_timeout_ms == 0 || self.stream_total_timeout_ms == 0 {
            return Err("Stream timeouts must be greater than zero".to_string());
        }

        if self.stream_idle_timeout_ms > self.stream_total_timeout_ms {
            return Err(
                "STREAM_IDLE_TIMEOUT_MS must not exceed STREAM_TOTAL_TIMEOUT_MS".to_string(),
            );
        }

        if self.rate_limit_refill_ms == 0 {
            return Err("RATE_LIMIT_REFILL_MS must be greater than zero".to_string());
        }

        if !self.dev_mode {
            if self.mongodb_uri.is_none() {
                return Err("MONGODB_URI is required in production mode".to_string());
            }
            if self.llm_base_url.is_none() {
                return Err("LLM_BASE_URL is required in production mode".to_string());
            }
        }

        Ok(())
    }

    /// Explicit authentication settings for the authenticator
    pub fn auth_config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(self.dev_mode, self.jwt_expiry_seconds)
            .with_env_secret(self.jwt_secret.clone());

        if let Some(dir) = &self.secrets_dir {
            config = config.with_store(Arc::new(DirSecretStore::new(dir)));
        }

        config
    }

    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            idle: Duration::from_millis(self.stream_idle_timeout_ms),
            total: Duration::from_millis(self.stream_total_timeout_ms),
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            burst: self.rate_limit_burst,
            refill: Duration::from_millis(self.rate_limit_refill_ms),
        }
    }
}
