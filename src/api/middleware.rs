//! API Middleware (Sessions, Rate Limiting, Logging)

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::handlers::AppState;
use super::session::{cookie_value, session_cookie, Session};
use super::types::{ApiError, ApiResponse};
use crate::core::auth;
use crate::utils::constants::{REMEMBER_COOKIE, SESSION_COOKIE, SESSION_IDLE_SECS};

/// Rate limiter configuration
pub struct RateLimitConfig {
    /// Requests per window
    pub requests_per_window: u32,
    /// Window duration
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 300,
            window_duration: Duration::from_secs(60),
        }
    }
}

/// In-memory fixed-window rate limiter
pub struct RateLimiter {
    /// Request counts per client
    requests: DashMap<String, (u32, Instant)>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            requests: DashMap::new(),
            config,
        }
    }

    /// Check if request is allowed, returns (allowed, remaining, reset_seconds)
    pub fn check(&self, key: &str) -> (bool, u32, u64) {
        let now = Instant::now();

        let mut entry = self.requests.entry(key.to_string()).or_insert((0, now));

        // Reset window if expired
        if now.duration_since(entry.1) > self.config.window_duration {
            entry.0 = 0;
            entry.1 = now;
        }

        let remaining = self.config.requests_per_window.saturating_sub(entry.0);
        let reset_secs = self
            .config
            .window_duration
            .saturating_sub(now.duration_since(entry.1))
            .as_secs();

        if entry.0 >= self.config.requests_per_window {
            return (false, 0, reset_secs);
        }

        entry.0 += 1;
        (true, remaining - 1, reset_secs)
    }

    /// Drop windows that ended long ago
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.requests.len();
        self.requests.retain(|_, (_, timestamp)| {
            now.duration_since(*timestamp) < self.config.window_duration * 2
        });
        before - self.requests.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

// Global rate limiter instance
lazy_static::lazy_static! {
    pub static ref RATE_LIMITER: Arc<RateLimiter> = Arc::new(RateLimiter::default());
}

fn client_key(headers: &HeaderMap, request: &Request) -> String {
    headers
        .get("X-Forwarded-For")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(headers: HeaderMap, request: Request, next: Next) -> Response {
    // Skip rate limiting for health check
    if request.uri().path() == "/health" || request.uri().path() == "/v1/health" {
        return next.run(request).await;
    }

    let rate_key = client_key(&headers, &request);
    let (allowed, remaining, reset) = RATE_LIMITER.check(&rate_key);

    if !allowed {
        warn!(key = %rate_key, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::error(ApiError::rate_limited(reset), 0.0)),
        )
            .into_response();
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Remaining", remaining.into());
    headers.insert("X-RateLimit-Reset", reset.into());

    response
}

/// Attach a [`Session`] to every request.
///
/// Unknown or missing session cookies get a fresh session; a valid
/// `remember_token` cookie binds it to its user again.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    let cookies = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (id, created) = state.sessions.open(cookie_value(&cookies, SESSION_COOKIE), now);
    let remember_token = cookie_value(&cookies, REMEMBER_COOKIE)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    if let Some(token) = &remember_token {
        let unbound = state.sessions.with(&id, |s| s.user_id.is_none());
        if unbound {
            if let Some(user) = auth::user_for_remember_token(&state.db, token) {
                debug!(user = %user.name, "Session restored from remember token");
                state.sessions.with(&id, |s| s.user_id = Some(user.id));
            }
        }
    }

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    request.extensions_mut().insert(Session {
        id: id.clone(),
        remote_addr,
        remember_token,
    });

    let mut response = next.run(request).await;
    if created {
        if let Ok(value) = HeaderValue::from_str(&session_cookie(&id)) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        "Request completed"
    );

    response
}

/// Periodically drop idle sessions and stale rate-limit windows
pub fn start_cleanup_task(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let sessions = state
                .sessions
                .cleanup(chrono::Utc::now().timestamp(), SESSION_IDLE_SECS);
            let windows = RATE_LIMITER.cleanup();
            if sessions + windows > 0 {
                debug!(sessions, windows, "Cleanup completed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_window: 2,
            window_duration: Duration::from_secs(60),
        });
        assert_eq!(limiter.check("a").0, true);
        let (allowed, remaining, _) = limiter.check("a");
        assert!(allowed);
        assert_eq!(remaining, 0);
        assert!(!limiter.check("a").0);
        assert!(limiter.check("b").0);
        assert_eq!(limiter.cleanup(), 0);
    }
}
