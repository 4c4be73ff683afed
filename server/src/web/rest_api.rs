use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::token::{TokenError, issue_media_grant};
use crate::db::models::{RoomStatus, TopicTemplate, owner_username};
use crate::db::queries::rooms::{self, NewRoom};
use crate::db::queries::{topic_templates, users};
use crate::engine::agenda::Topic;
use crate::engine::validation::{validate_slug, validate_title, validate_topic};

use super::app_state::AppState;
use super::auth_middleware::{AuthUser, MaybeAuthUser};

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn database_error(e: sqlx::Error, what: &str) -> Response {
    error!(error = %e, "{what}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// Owner username for a caller, from the session or the mirrored user record.
async fn caller_username(state: &AppState, auth: &AuthUser) -> Result<String, sqlx::Error> {
    let c = &auth.claims;
    if c.username.is_some() || c.name.is_some() || c.email.is_some() {
        return Ok(auth.owner_username());
    }
    let user = users::get_user(&state.db, &auth.user_id).await?;
    Ok(match user {
        Some(u) => owner_username(u.username.as_deref(), u.full_name.as_deref(), u.email.as_deref()),
        None => owner_username(None, None, None),
    })
}

// ── Rooms ───────────────────────────────────────────────

/// GET /api/rooms: rooms owned by the caller, newest first.
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(auth): MaybeAuthUser,
) -> Response {
    let Some(auth) = auth else {
        return Json(serde_json::json!({ "rooms": [] })).into_response();
    };
    match rooms::list_rooms_by_owner(&state.db, &auth.user_id).await {
        Ok(rows) => Json(serde_json::json!({ "rooms": rows })).into_response(),
        Err(e) => database_error(e, "Failed to list rooms"),
    }
}

/// GET /api/rooms/public: the newest public rooms still running.
pub async fn list_public_rooms(State(state): State<Arc<AppState>>) -> Response {
    match rooms::list_public_rooms(&state.db).await {
        Ok(rows) => Json(serde_json::json!({ "rooms": rows })).into_response(),
        Err(e) => database_error(e, "Failed to list public rooms"),
    }
}

#[derive(Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default)]
    pub header_image_url: Option<String>,
}

/// POST /api/rooms: create a room under the caller's username.
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateRoomRequest>,
) -> Response {
    let title = body.title.as_deref().map(str::trim).unwrap_or_default();
    let slug = body.slug.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() || slug.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "Missing title or slug");
    }
    if let Err(e) = validate_title(title).and_then(|_| validate_slug(slug)) {
        return api_error(StatusCode::BAD_REQUEST, e);
    }

    let owner = match caller_username(&state, &auth).await {
        Ok(name) => name,
        Err(e) => return database_error(e, "Failed to resolve owner"),
    };
    let id = Uuid::new_v4().to_string();
    let channel_name = format!("{owner}-{slug}");
    let template = body.template.as_deref().filter(|t| !t.is_empty());
    let new_room = NewRoom {
        id: &id,
        owner_id: &auth.user_id,
        owner_username: &owner,
        title,
        slug,
        template,
        channel_name: &channel_name,
        is_public: body.is_public.unwrap_or(false),
        header_image_url: body.header_image_url.as_deref(),
    };

    match rooms::create_room(&state.db, &new_room).await {
        Ok(room) => {
            info!(room = %room.id, %owner, %slug, "room created");
            (StatusCode::CREATED, Json(serde_json::json!({ "room": room }))).into_response()
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            api_error(StatusCode::CONFLICT, "Room already exists")
        }
        Err(e) => database_error(e, "Failed to create room"),
    }
}

/// GET /api/rooms/{username}/{slug}: public fetch of one room.
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path((username, slug)): Path<(String, String)>,
) -> Response {
    match rooms::get_room_by_slug(&state.db, &username, &slug).await {
        Ok(Some(room)) => Json(serde_json::json!({ "room": room })).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Room not found"),
        Err(e) => database_error(e, "Failed to fetch room"),
    }
}

#[derive(Deserialize)]
pub struct UpdateRoomRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

/// PATCH /api/rooms/{username}/{slug}: owner changes status and/or visibility.
pub async fn update_room(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((username, slug)): Path<(String, String)>,
    Json(body): Json<UpdateRoomRequest>,
) -> Response {
    let status = match body.status.as_deref() {
        None => None,
        Some("active") => Some(RoomStatus::Active),
        Some("ended") => Some(RoomStatus::Ended),
        Some(_) => return api_error(StatusCode::BAD_REQUEST, "Invalid update"),
    };
    if status.is_none() && body.is_public.is_none() {
        return api_error(StatusCode::BAD_REQUEST, "Invalid update");
    }

    // Both fields land together or not at all.
    let mut tx = match state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => return database_error(e, "Failed to start room update"),
    };
    let mut updated = None;
    if let Some(status) = status {
        match rooms::update_room_status(&mut *tx, &auth.user_id, &username, &slug, status).await {
            Ok(row) => updated = row,
            Err(e) => return database_error(e, "Failed to update room status"),
        }
        if updated.is_none() {
            return api_error(StatusCode::NOT_FOUND, "Room not found");
        }
    }
    if let Some(is_public) = body.is_public {
        match rooms::update_room_visibility(&mut *tx, &auth.user_id, &username, &slug, is_public)
            .await
        {
            Ok(row) => updated = row,
            Err(e) => return database_error(e, "Failed to update room visibility"),
        }
    }
    if let Err(e) = tx.commit().await {
        return database_error(e, "Failed to commit room update");
    }

    match updated {
        Some(room) => {
            info!(room = %room.id, status = %room.status, is_public = room.is_public, "room updated");
            Json(serde_json::json!({ "room": room })).into_response()
        }
        None => api_error(StatusCode::NOT_FOUND, "Room not found"),
    }
}

/// DELETE /api/rooms/{username}/{slug}: owner removes a room.
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((username, slug)): Path<(String, String)>,
) -> Response {
    match rooms::delete_room(&state.db, &auth.user_id, &username, &slug).await {
        Ok(Some(room)) => {
            info!(room = %room.id, "room deleted");
            Json(serde_json::json!({ "room": room })).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Room not found"),
        Err(e) => database_error(e, "Failed to delete room"),
    }
}

// ── Topic templates ─────────────────────────────────────

fn decode_templates(rows: Vec<crate::db::models::TopicTemplateRow>) -> Vec<TopicTemplate> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            TopicTemplate::try_from(row)
                .map_err(|e| warn!(template = %id, error = %e, "skipping undecodable template"))
                .ok()
        })
        .collect()
}

/// GET /api/topic-templates: the caller's templates.
pub async fn list_templates(State(state): State<Arc<AppState>>, auth: AuthUser) -> Response {
    match topic_templates::list_templates_by_owner(&state.db, &auth.user_id).await {
        Ok(rows) => Json(serde_json::json!({ "templates": decode_templates(rows) })).into_response(),
        Err(e) => database_error(e, "Failed to list templates"),
    }
}

#[derive(Deserialize)]
pub struct TopicInput {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub minutes: u32,
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub topics: Vec<TopicInput>,
}

/// POST /api/topic-templates: save a named running order.
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateTemplateRequest>,
) -> Response {
    let title = body.title.trim();
    if title.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "Invalid title");
    }
    let mut topics = Vec::with_capacity(body.topics.len());
    for input in body.topics {
        if let Err(e) = validate_topic(&input.title, input.minutes) {
            return api_error(StatusCode::BAD_REQUEST, e);
        }
        let mut topic = Topic::new(input.title.trim(), input.minutes);
        if let Some(id) = input.id.filter(|id| !id.is_empty()) {
            topic.id = id;
        }
        topics.push(topic);
    }

    let topics_json = match serde_json::to_string(&topics) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Failed to encode topics");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Encoding error");
        }
    };
    let owner = auth.claims.username.as_deref().unwrap_or("unknown");
    let id = Uuid::new_v4().to_string();

    let row = match topic_templates::create_template(
        &state.db,
        &id,
        &auth.user_id,
        owner,
        title,
        &topics_json,
    )
    .await
    {
        Ok(row) => row,
        Err(e) => return database_error(e, "Failed to create template"),
    };
    info!(template = %row.id, topics = topics.len(), "topic template created");
    let template = TopicTemplate {
        id: row.id,
        owner_id: row.owner_id,
        owner_username: row.owner_username,
        title: row.title,
        topics,
        created_at: row.created_at,
    };
    (StatusCode::CREATED, Json(serde_json::json!({ "template": template }))).into_response()
}

/// GET /api/topic-templates/{id}
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match topic_templates::get_template(&state.db, &id).await {
        Ok(Some(row)) => match TopicTemplate::try_from(row) {
            Ok(template) => Json(serde_json::json!({ "template": template })).into_response(),
            Err(e) => {
                error!(template = %id, error = %e, "Stored template is corrupt");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Corrupt template")
            }
        },
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Template not found"),
        Err(e) => database_error(e, "Failed to fetch template"),
    }
}

// ── Media tokens ────────────────────────────────────────

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
}

/// GET /api/rtc-token?channel&uid: one-hour media and messaging tokens.
pub async fn rtc_token(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(auth): MaybeAuthUser,
    Query(query): Query<TokenQuery>,
) -> Response {
    let channel = query.channel.filter(|c| !c.is_empty());
    let uid = query
        .uid
        .filter(|u| !u.is_empty())
        .or_else(|| auth.map(|a| a.user_id));
    let (Some(channel), Some(uid)) = (channel, uid) else {
        return api_error(StatusCode::BAD_REQUEST, "Missing channel or uid");
    };

    match issue_media_grant(&state.rtc_config, &channel, &uid) {
        Ok(grant) => Json(grant).into_response(),
        Err(TokenError::NotConfigured) => {
            error!("RTC app credentials are not configured");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "RTC credentials not configured")
        }
        Err(e) => {
            error!(error = %e, "Failed to sign media tokens");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Token generation failed")
        }
    }
}
