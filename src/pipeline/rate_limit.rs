//! Per-actor token buckets

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::types::GatewayError;

/// Bucket key for requests without an actor
pub const ANONYMOUS_KEY: &str = "anonymous";

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests allowed back to back
    pub burst: u32,
    /// Time to regain one request
    pub refill: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 60,
            refill: Duration::from_millis(1000),
        }
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Take one token for `key`
    pub fn check(&self, key: &str) -> Result<(), GatewayError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), GatewayError> {
        let burst = self.config.burst.max(1) as f64;
        let refill = self.config.refill.as_secs_f64().max(f64::EPSILON);

        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst,
            last: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed / refill).min(burst);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let retry_after_ms = ((1.0 - bucket.tokens) * refill * 1000.0).ceil() as u64;
            Err(GatewayError::RateLimitExceeded { retry_after_ms })
        }
    }
}
