use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::engine::rate_limiter::RateLimiter;

/// Per-IP rate limiters for different endpoint tiers.
pub struct ApiRateLimiters {
    /// Media/messaging token issuance.
    /// Burst of 10, refill 1 per 6 seconds (~10/minute).
    pub token: RateLimiter,
    /// Room and template endpoints.
    /// Burst of 60, refill 1 per second (~60/minute sustained).
    pub api: RateLimiter,
    /// Messaging relay upgrades.
    /// Burst of 5, refill 1 per 12 seconds (~5/minute).
    pub ws: RateLimiter,
    /// Identity-provider webhook deliveries.
    /// Burst of 30, refill 1 per 2 seconds.
    pub webhook: RateLimiter,
}

impl Default for ApiRateLimiters {
    fn default() -> Self {
        Self {
            token: RateLimiter::new(10, 6.0),
            api: RateLimiter::new(60, 1.0),
            ws: RateLimiter::new(5, 12.0),
            webhook: RateLimiter::new(30, 2.0),
        }
    }
}

impl ApiRateLimiters {
    /// Forget clients that have been idle for `older_than`.
    pub fn cleanup(&self, older_than: Duration) {
        for limiter in [&self.token, &self.api, &self.ws, &self.webhook] {
            limiter.cleanup(older_than);
        }
    }
}

/// Extract client IP from request, only trusting proxy headers from loopback.
///
/// A loopback peer means a local reverse proxy, so X-Forwarded-For / X-Real-IP
/// are honoured. Anyone else is keyed by their socket address.
fn client_ip(req: &Request<Body>) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let from_loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

    if from_loopback {
        if let Some(forwarded) = req.headers().get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = req.headers().get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn limited(
    req: Request<Body>,
    next: Next,
    pick: fn(&ApiRateLimiters) -> &RateLimiter,
    message: &'static str,
) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !pick(limiters).check(&ip) {
            tracing::debug!(%ip, "rate limit exceeded");
            return (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        }
    }
    next.run(req).await
}

/// Middleware for token issuance rate limiting.
pub async fn token_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.token,
        "Rate limit exceeded. Please try again later.",
    )
    .await
}

/// Middleware for general API rate limiting.
pub async fn api_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.api,
        "Rate limit exceeded. Please try again later.",
    )
    .await
}

/// Middleware for WebSocket connection rate limiting.
pub async fn ws_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.ws,
        "Too many connections. Please try again later.",
    )
    .await
}

/// Middleware for webhook delivery rate limiting.
pub async fn webhook_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.webhook,
        "Rate limit exceeded. Please try again later.",
    )
    .await
}
