//! Rate limiting for authentication endpoints.
//!
//! Token buckets keyed by client IP to slow down credential guessing and
//! signup spam.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use serde_json::json;
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Quotas for the limited endpoints.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub login_per_sec: NonZeroU32,
    pub login_burst: NonZeroU32,
    pub register_per_min: NonZeroU32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_per_sec: NonZeroU32::MIN,
            login_burst: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
            register_per_min: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
        }
    }
}

impl RateLimitSettings {
    /// Limits high enough never to trip in tests.
    pub fn unlimited() -> Self {
        let high = NonZeroU32::new(10_000).unwrap_or(NonZeroU32::MAX);
        Self {
            login_per_sec: high,
            login_burst: high,
            register_per_min: high,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    /// Login: 1 request per second per IP, bursts of 5
    pub login: Arc<IpLimiter>,
    /// Registration: 3 requests per minute per IP
    pub register: Arc<IpLimiter>,
}

impl RateLimitConfig {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(settings.login_per_sec).allow_burst(settings.login_burst),
            )),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(
                settings.register_per_min,
            ))),
        }
    }
}

fn too_many(message: &'static str) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": message }))).into_response()
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request);
    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(%ip, "Login rate limit exceeded");
            too_many("Too many login attempts. Please wait before trying again.")
        }
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request);
    match config.register.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(%ip, "Registration rate limit exceeded");
            too_many("Too many signup attempts. Please wait before trying again.")
        }
    }
}
