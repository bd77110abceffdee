//! Fixed-window rate limiting per client IP.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Body of a 429 response.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

/// Entries are swept once the table grows past this size.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's window resets.
    pub reset_after: Duration,
}

/// In-memory fixed-window counter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request from `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = clients.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);

        let decision = Decision {
            allowed: entry.count <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset_after: self.window.saturating_sub(now.duration_since(entry.started)),
        };

        if clients.len() > SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        decision
    }
}

fn client_key(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_limit_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
}

/// Reject clients that exceed their request budget for the current window.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let decision = limiter.check(&key);

    if !decision.allowed {
        warn!(client = %key, limit = decision.limit, "Rate limit exceeded");
        let retry_after = decision.reset_after.as_secs_f64().ceil() as u64;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE).into_response();
        set_limit_headers(&mut response, &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(request).await;
    set_limit_headers(&mut response, &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, remaining);
        }
        let decision = limiter.check("10.0.0.1");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_after, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(900));
        assert!(limiter.check("10.0.0.1").allowed);
        assert!(!limiter.check("10.0.0.1").allowed);

        tokio::time::advance(Duration::from_secs(899)).await;
        let decision = limiter.check("10.0.0.1");
        assert!(!decision.allowed);
        assert_eq!(decision.reset_after, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check("10.0.0.1").allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.2").allowed);
        assert!(!limiter.check("10.0.0.1").allowed);
    }

    #[test]
    fn test_client_key_falls_back_without_connect_info() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_key(&request), "unknown");

        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 9], 4000))));
        assert_eq!(client_key(&request), "192.168.1.9");
    }
}
