use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::debug;

use crate::auth::token::validate_session_token;

use super::app_state::AppState;
use super::auth_middleware::session_token;

/// File extensions served as static assets without a session.
const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "map", "json", "webmanifest", "txt", "xml", "html", "ico", "png", "jpg",
    "jpeg", "gif", "svg", "webp", "avif", "woff", "woff2", "ttf", "otf", "wasm", "mp3", "mp4",
];

fn is_static_asset(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    last.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty() && STATIC_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
    })
}

/// Whether a page path can be viewed without signing in.
///
/// The landing page, sign-in/up pages, static assets and any `/{owner}/{slug}`
/// room URL are open. API and relay paths authenticate per handler and are
/// never gated.
pub fn is_public_path(path: &str) -> bool {
    if path == "/" || path.starts_with("/api/") || path == "/api" || path.starts_with("/ws/") {
        return true;
    }
    if is_static_asset(path) {
        return true;
    }
    if path.starts_with("/sign-in") || path.starts_with("/sign-up") {
        return true;
    }
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    segments.len() == 2 && segments.iter().all(|s| !s.is_empty())
}

/// Redirect anonymous visitors away from protected pages.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if is_public_path(path) {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let authenticated = session_token(&parts)
        .is_some_and(|t| validate_session_token(&t, &state.auth_config.jwt_secret).is_ok());
    if !authenticated {
        debug!(path = %parts.uri.path(), "redirecting anonymous visitor");
        return Redirect::to("/").into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
