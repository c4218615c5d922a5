//! Per-client token bucket rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refilled to capacity by `now`, so indistinguishable from a new bucket.
    fn is_full(&self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }
}

/// Checks between sweeps of idle buckets.
const SWEEP_EVERY: u64 = 1024;

/// Buckets keyed by client IP.
pub struct RateLimiterState {
    buckets: DashMap<IpAddr, TokenBucket>,
    rps: f64,
    burst: f64,
    checks: AtomicU64,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            rps: config.requests_per_second as f64,
            burst: config.burst_size as f64,
            checks: AtomicU64::new(0),
        }
    }

    pub fn check(&self, client: IpAddr) -> bool {
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.prune_idle(Instant::now());
        }
        self.buckets
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.rps)
    }

    /// Drop buckets that have refilled completely. Returns how many were dropped.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full(now, self.burst, self.rps));
        before.saturating_sub(self.buckets.len())
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.check(addr.ip()) {
        return next.run(request).await;
    }

    tracing::warn!(client = %addr.ip(), path = %request.uri().path(), "Rate limit exceeded");
    metrics::record_rate_limited();
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "rate_limited", "message": "too many requests, slow down" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let state = RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst_size: 3,
        });
        let client: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(state.check(client));
        assert!(state.check(client));
        assert!(state.check(client));
        assert!(!state.check(client));

        // Separate bucket per client.
        assert!(state.check("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_refilled_buckets_are_pruned() {
        let state = RateLimiterState::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 10,
            burst_size: 2,
        });
        for last in 1..=50u8 {
            assert!(state.check(IpAddr::from([10, 0, 1, last])));
        }
        assert_eq!(state.len(), 50);

        // Nothing has refilled yet.
        assert_eq!(state.prune_idle(Instant::now()), 0);

        // 2 tokens at 10/s: full again after 100ms.
        let later = Instant::now() + std::time::Duration::from_millis(200);
        assert_eq!(state.prune_idle(later), 50);
        assert!(state.is_empty());
    }
}
