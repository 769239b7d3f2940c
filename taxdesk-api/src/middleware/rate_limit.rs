/// Per-client rate limiting
///
/// Token buckets keyed by client IP are kept in process behind a mutex. Each
/// bucket holds `max_requests` tokens and refills evenly over the configured
/// window, so a client may burst up to the limit and then continues at the
/// average rate.
///
/// Two limiters run side by side: the general API limiter and a stricter one
/// for authentication endpoints and the public contact form.
///
/// Clients are keyed by peer address. `X-Forwarded-For` is only consulted
/// when `TRUST_PROXY` is set, since any client can forge it.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per window
/// - `X-RateLimit-Remaining`: tokens left after this request
/// - `X-RateLimit-Reset`: seconds until the bucket is full again
/// - `Retry-After`: seconds to wait (429 responses only)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;

use crate::app::AppState;
use crate::error::ApiError;

/// Buckets are dropped once idle for this many windows
const IDLE_WINDOWS: u32 = 2;

/// Sweep for idle buckets every N checks
const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, rate_per_sec: f64, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(f64::from(capacity));
        self.last_refill = now;
    }

    fn secs_until(&self, target: f64, rate_per_sec: f64) -> u64 {
        let deficit = target - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / rate_per_sec).ceil() as u64
        }
    }
}

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,

    /// Seconds until the bucket is full again
    pub reset_after: u64,

    /// Seconds until the next request would be allowed
    pub retry_after: u64,
}

impl RateLimitDecision {
    fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(self.reset_after));
    }
}

/// In-process token bucket limiter
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, TokenBucket>>,
    checks: std::sync::atomic::AtomicU64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            capacity: max_requests.max(1),
            window: window.max(Duration::from_millis(1)),
            buckets: Mutex::new(HashMap::new()),
            checks: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn rate_per_sec(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }

    /// Consumes one token for `key` if available
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let rate = self.rate_per_sec();
        let checks = self
            .checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut buckets = self.buckets.lock();
        if checks % PRUNE_EVERY == PRUNE_EVERY - 1 {
            let max_idle = self.window * IDLE_WINDOWS;
            buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < max_idle);
        }

        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity, now));
        bucket.refill(rate, self.capacity, now);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        RateLimitDecision {
            allowed,
            limit: self.capacity,
            remaining: bucket.tokens.floor() as u32,
            reset_after: bucket.secs_until(f64::from(self.capacity), rate),
            retry_after: bucket.secs_until(1.0, rate).max(1),
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// Identifies the caller by peer address, or by the first `X-Forwarded-For`
/// hop when the proxy in front is trusted
fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Client address recorded for audit logging
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

async fn enforce(
    limiter: &RateLimiter,
    trust_proxy: bool,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(&request, trust_proxy);
    let decision = limiter.check(&key);

    if !decision.allowed {
        tracing::warn!(client = %key, "Rate limit exceeded");
        return Err(ApiError::RateLimitExceeded {
            retry_after: decision.retry_after,
            message: format!(
                "Too many requests. Try again in {} seconds",
                decision.retry_after
            ),
        });
    }

    request.extensions_mut().insert(ClientIp(key));

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    Ok(response)
}

/// General API limiter
pub async fn api_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state.api_limiter, state.config.rate_limit.trust_proxy, request, next).await
}

/// Stricter limiter for auth endpoints and the contact form
pub async fn auth_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state.auth_limiter, state.config.rate_limit.trust_proxy, request, next).await
}
