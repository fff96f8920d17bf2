//! Per-source connection rate limiting.
//!
//! Each source gets `limit` requests per window. A source's count resets once
//! a full window has passed since its last request; sources idle for two
//! windows are forgotten by a background sweep.

use axum::http::HeaderMap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default rate window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Visitor {
    count: u32,
    last_seen: Instant,
}

/// Windowed request counter keyed by source address.
#[derive(Debug)]
pub struct RateLimiter {
    visitors: DashMap<String, Visitor>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per minute.
    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, WINDOW)
    }

    /// Create a limiter allowing `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            visitors: DashMap::new(),
            limit,
            window,
        }
    }

    /// Record a request from `key` and report whether it is allowed.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut visitor = self.visitors.entry(key.to_string()).or_insert(Visitor {
            count: 0,
            last_seen: now,
        });

        if now.duration_since(visitor.last_seen) > self.window {
            visitor.count = 0;
        }
        visitor.last_seen = now;
        visitor.count = visitor.count.saturating_add(1);

        visitor.count <= self.limit
    }

    /// Forget sources idle for more than two windows.
    pub fn sweep(&self) {
        let now = Instant::now();
        let max_idle = self.window * 2;
        let before = self.visitors.len();
        self.visitors
            .retain(|_, v| now.duration_since(v.last_seen) <= max_idle);
        let removed = before.saturating_sub(self.visitors.len());
        if removed > 0 {
            debug!(
                removed,
                remaining = self.visitors.len(),
                "Swept idle rate limit entries"
            );
        }
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.visitors.len()
    }

    /// Spawn the background sweep, running once per window.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }
}

/// The key a request is rate limited under.
///
/// Uses the first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer IP.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));

        // Other sources are counted separately
        assert!(limiter.allow("5.6.7.8"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_quiet_period() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));

        tokio::time::advance(Duration::from_secs(30)).await;
        // Still hammering: the window keeps sliding
        assert!(!limiter.allow("1.2.3.4"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_forgets_idle_sources() {
        let limiter = RateLimiter::per_minute(10);
        limiter.allow("old");
        tokio::time::advance(Duration::from_secs(90)).await;
        limiter.allow("recent");
        tokio::time::advance(Duration::from_secs(40)).await;

        limiter.sweep();
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs() {
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(1)));
        limiter.allow("idle");
        let sweeper = limiter.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(limiter.tracked(), 0);
        sweeper.abort();
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, peer), "10.0.0.1");

        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.9"));
        assert_eq!(client_key(&headers, peer), "192.168.1.9");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 70.41.3.18"),
        );
        assert_eq!(client_key(&headers, peer), "203.0.113.7");
    }
}
