//! Token-bucket rate limiting (§4.5).

use actix_web::HttpRequest;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::route::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

/// Shared per-key token-bucket state for a single route. One instance is
/// built per route at dispatcher construction time and reused across
/// requests (§4.2 runs this stage after auth, before cache lookup).
pub struct RateLimiterState {
    buckets: Mutex<HashMap<String, Bucket>>,
    capacity: f64,
    period: Duration,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: config.requests as f64,
            period: Duration::from_secs(config.period_seconds.max(1)),
        }
    }

    /// Attempts to take one token for `key`. Returns `Ok(())` if allowed,
    /// `Err(retry_after_seconds)` otherwise. Buckets are created lazily,
    /// full on first sight, and evicted when idle longer than `2 * period`.
    pub fn try_acquire(&self, key: &str) -> Result<(), u64> {
        let capacity_per_second = self.capacity / self.period.as_secs_f64();
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");

        let idle_cutoff = self.period * 2;
        buckets.retain(|_, b| now.duration_since(b.last_access) < idle_cutoff);

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
            last_access: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let refill = elapsed.floor() * capacity_per_second;
        if refill > 0.0 {
            bucket.tokens = (bucket.tokens + refill).min(self.capacity);
            bucket.last_refill = now;
        }
        bucket.last_access = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let time_to_next_token = if capacity_per_second > 0.0 {
                (1.0 / capacity_per_second).ceil() as u64
            } else {
                self.period.as_secs()
            };
            Err(time_to_next_token.max(1))
        }
    }
}

/// Derives the rate-limit key for a request: `X-Real-IP` if present, else
/// the peer address (§4.5 `key_for` hook).
pub fn key_for(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            req.peer_addr()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        })
}
