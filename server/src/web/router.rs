use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::app_state::AppState;
use super::rate_limit::{
    ApiRateLimiters, api_rate_limit, token_rate_limit, webhook_rate_limit, ws_rate_limit,
};
use super::{identity_webhook, rest_api, route_gate, ws_handler};

/// Largest JSON body accepted by the API (bytes).
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(
    state: Arc<AppState>,
    rate_limiters: Arc<ApiRateLimiters>,
    static_dir: &str,
) -> Router {
    // Restrict CORS to the configured public_url origin (or allow any for localhost dev)
    let public_url = &state.auth_config.public_url;
    let cors = if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Media token issuance: tight limit
    let token_routes = Router::new()
        .route("/api/rtc-token", get(rest_api::rtc_token))
        .layer(axum::middleware::from_fn(token_rate_limit));

    // Messaging relay: connection rate limit
    let ws_routes = Router::new()
        .route("/ws/channel", get(ws_handler::channel_upgrade))
        .layer(axum::middleware::from_fn(ws_rate_limit));

    // Identity provider pushes
    let webhook_routes = Router::new()
        .route("/api/identity/webhook", post(identity_webhook::identity_webhook))
        .layer(axum::middleware::from_fn(webhook_rate_limit));

    // Rooms and templates: general rate limit
    let api_routes = Router::new()
        .route(
            "/api/rooms",
            get(rest_api::list_rooms).post(rest_api::create_room),
        )
        .route("/api/rooms/public", get(rest_api::list_public_rooms))
        .route(
            "/api/rooms/{username}/{slug}",
            get(rest_api::get_room)
                .patch(rest_api::update_room)
                .delete(rest_api::delete_room),
        )
        .route(
            "/api/topic-templates",
            get(rest_api::list_templates).post(rest_api::create_template),
        )
        .route("/api/topic-templates/{id}", get(rest_api::get_template))
        .layer(axum::middleware::from_fn(api_rate_limit));

    let static_root = Path::new(static_dir);

    Router::new()
        .merge(ws_routes)
        .merge(token_routes)
        .merge(webhook_routes)
        .merge(api_routes)
        // Static files with SPA fallback: unmatched routes serve index.html
        .fallback_service(
            ServeDir::new(static_root).fallback(ServeFile::new(static_root.join("index.html"))),
        )
        // Anonymous visitors only reach the landing, sign-in and room pages
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            route_gate::require_session,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Inject rate limiters into all request extensions
        .layer(axum::Extension(rate_limiters))
        .with_state(state)
}
