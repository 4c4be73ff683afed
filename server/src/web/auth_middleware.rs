use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;

use crate::auth::token::{Claims, validate_session_token};
use crate::db::models::owner_username;

use super::app_state::AppState;

/// Name of the cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "podium_session";

/// Extractor that validates the session JWT from the `podium_session` cookie
/// or an `Authorization: Bearer` header.
pub struct AuthUser {
    pub user_id: String,
    pub claims: Claims,
}

impl AuthUser {
    /// The name this user's rooms are addressed under.
    pub fn owner_username(&self) -> String {
        owner_username(
            self.claims.username.as_deref(),
            self.claims.name.as_deref(),
            self.claims.email.as_deref(),
        )
    }
}

/// Session token from the request, cookie first.
pub(crate) fn session_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or_else(|| {
            (StatusCode::UNAUTHORIZED, "Not authenticated").into_response()
        })?;

        let claims = validate_session_token(&token, &state.auth_config.jwt_secret).map_err(
            |_| (StatusCode::UNAUTHORIZED, "Invalid or expired session").into_response(),
        )?;

        Ok(AuthUser {
            user_id: claims.sub.clone(),
            claims,
        })
    }
}

/// Like [`AuthUser`] but never rejects; anonymous callers get `None`.
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(
            AuthUser::from_request_parts(parts, state).await.ok(),
        ))
    }
}
