//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and signup spam.

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
use crate::cli::IpExtractor;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();

/// Rate limiters for the authentication endpoints.
pub struct RateLimitConfig {
    /// Login: bursts of 5, refilling at 1 request per second per IP
    pub login: IpLimiter,
    /// Registration: 3 requests per minute per IP
    pub register: IpLimiter,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            login: RateLimiter::keyed(Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST)),
            register: RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    pub config: Arc<RateLimitConfig>,
    pub ip_extractor: Option<IpExtractor>,
}

fn too_many(message: &'static str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "TOO_MANY_REQUESTS", "message": message })),
    )
        .into_response()
}

async fn check(
    state: &RateLimitState,
    limiter: &IpLimiter,
    message: &'static str,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, state.ip_extractor.as_ref()) {
        Ok(ip) => ip,
        Err(_) => {
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            too_many(message)
        }
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.config.clone();
    check(
        &state,
        &config.login,
        "Too many login attempts. Please wait before trying again.",
        request,
        next,
    )
    .await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let config = state.config.clone();
    check(
        &state,
        &config.register,
        "Too many signup attempts. Please wait before trying again.",
        request,
        next,
    )
    .await
}
