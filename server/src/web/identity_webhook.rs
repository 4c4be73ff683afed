use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info, warn};

use crate::auth::webhook::{self, IdentityEvent};
use crate::db::queries::users::{self, UpsertUser};

use super::app_state::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn reply(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// POST /api/identity/webhook: mirror user records pushed by the identity provider.
pub async fn identity_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.auth_config.webhook_secret.as_deref() else {
        error!("IDENTITY_WEBHOOK_SECRET is not set; rejecting delivery");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, "Webhook secret not configured");
    };

    let (Some(id), Some(timestamp), Some(signatures)) = (
        header(&headers, "svix-id"),
        header(&headers, "svix-timestamp"),
        header(&headers, "svix-signature"),
    ) else {
        return reply(StatusCode::BAD_REQUEST, "Missing signature headers");
    };

    let now = chrono::Utc::now().timestamp();
    if let Err(e) = webhook::verify(secret, id, timestamp, signatures, &body, now) {
        warn!(delivery = %id, error = %e, "webhook verification failed");
        return reply(StatusCode::BAD_REQUEST, "Invalid signature");
    }

    let event: IdentityEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(delivery = %id, error = %e, "undecodable webhook payload");
            return reply(StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    if !event.is_user_upsert() {
        debug!(delivery = %id, kind = %event.kind, "ignoring identity event");
        return (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response();
    }

    let user = &event.data;
    let full_name = user.full_name();
    let record = UpsertUser {
        id: &user.id,
        username: user.username.as_deref(),
        full_name: full_name.as_deref(),
        email: user.primary_email(),
        avatar_url: user.image_url.as_deref(),
    };
    match users::upsert_user(&state.db, &record).await {
        Ok(row) => {
            info!(user = %row.id, kind = %event.kind, "user record synced");
            (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
        }
        Err(e) => {
            error!(error = %e, user = %user.id, "Failed to upsert user");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}
