//! Fixed-window rate limiting keyed by client identity.

use crate::config::ThrottlingConfig;
use crate::dispatch::Exchange;
use axum::extract::ConnectInfo;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Counters are swept once the table grows past this many clients.
const PURGE_THRESHOLD: usize = 10_000;

/// At most `count` requests per client per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }

    pub fn from_config(config: &ThrottlingConfig) -> Self {
        Self::new(config.count, config.time_unit.duration(config.time_frame))
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Shared, concurrently updated request counters.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimit,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(policy: RateLimit) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    pub fn policy(&self) -> RateLimit {
        self.policy
    }

    /// Counts one request for `client`; `false` once its window is exhausted.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        if self.windows.len() > PURGE_THRESHOLD {
            self.purge(now);
        }

        let mut window = self
            .windows
            .entry(client.to_string())
            .or_insert_with(|| Window { started: now, hits: 0 });

        if now.duration_since(window.started) >= self.policy.window {
            window.started = now;
            window.hits = 0;
        }

        if window.hits < self.policy.count {
            window.hits += 1;
            true
        } else {
            false
        }
    }

    /// Drops every window that has already expired.
    fn purge(&self, now: Instant) {
        let window = self.policy.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address.
pub fn client_key(exchange: &Exchange) -> String {
    if let Some(forwarded) = exchange.header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    exchange
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window() {
        let limiter = RateLimiter::new(RateLimit::new(2, Duration::from_secs(10)));

        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Other clients have their own counters.
        assert!(limiter.check("10.0.0.2"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_expired() {
        let limiter = RateLimiter::new(RateLimit::new(1, Duration::from_secs(1)));
        limiter.check("a");
        limiter.check("b");
        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check("c");
        limiter.purge(Instant::now());
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_key_prefers_forwarded() {
        let (head, _) = axum::http::Request::get("/")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap()
            .into_parts();
        let ex = Exchange::new(head, Default::default());
        assert_eq!(client_key(&ex), "203.0.113.9");

        let ex = crate::dispatch::exchange::test_exchange("/");
        assert_eq!(client_key(&ex), "unknown");
    }
}
