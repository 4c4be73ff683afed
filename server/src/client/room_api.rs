use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub use crate::auth::token::MediaGrant;
use crate::db::models::{RoomRow, TopicTemplate};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{status}: {message}")]
    Status { status: u16, message: String },
    #[error("not found")]
    NotFound,
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The data-store calls a room session makes.
#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn fetch_room(&self, owner_username: &str, slug: &str) -> Result<RoomRow, ApiError>;
    async fn set_visibility(
        &self,
        owner_username: &str,
        slug: &str,
        is_public: bool,
    ) -> Result<RoomRow, ApiError>;
    async fn mark_ended(&self, owner_username: &str, slug: &str) -> Result<RoomRow, ApiError>;
    async fn fetch_template(&self, id: &str) -> Result<TopicTemplate, ApiError>;
    async fn fetch_credentials(&self, channel: &str, uid: &str) -> Result<MediaGrant, ApiError>;
}

#[derive(Deserialize)]
struct RoomEnvelope {
    room: RoomRow,
}

#[derive(Deserialize)]
struct TemplateEnvelope {
    template: TopicTemplate,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`RoomApi`] over the server's REST routes.
#[derive(Clone)]
pub struct HttpRoomApi {
    http: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpRoomApi {
    pub fn new(base_url: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token,
        }
    }

    fn room_url(&self, owner_username: &str, slug: &str) -> String {
        format!(
            "{}/api/rooms/{}/{}",
            self.base_url,
            urlencoding::encode(owner_username),
            urlencoding::encode(slug)
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        debug!(%method, %url, "room api request");
        let mut req = self.http.request(method, &url);
        if let Some(token) = &self.session_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RoomApi for HttpRoomApi {
    async fn fetch_room(&self, owner_username: &str, slug: &str) -> Result<RoomRow, ApiError> {
        let url = self.room_url(owner_username, slug);
        let envelope: RoomEnvelope = self.send(Method::GET, url, None).await?;
        Ok(envelope.room)
    }

    async fn set_visibility(
        &self,
        owner_username: &str,
        slug: &str,
        is_public: bool,
    ) -> Result<RoomRow, ApiError> {
        let url = self.room_url(owner_username, slug);
        let body = serde_json::json!({ "is_public": is_public });
        let envelope: RoomEnvelope = self.send(Method::PATCH, url, Some(body)).await?;
        Ok(envelope.room)
    }

    async fn mark_ended(&self, owner_username: &str, slug: &str) -> Result<RoomRow, ApiError> {
        let url = self.room_url(owner_username, slug);
        let body = serde_json::json!({ "status": "ended" });
        let envelope: RoomEnvelope = self.send(Method::PATCH, url, Some(body)).await?;
        Ok(envelope.room)
    }

    async fn fetch_template(&self, id: &str) -> Result<TopicTemplate, ApiError> {
        let url = format!(
            "{}/api/topic-templates/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        let envelope: TemplateEnvelope = self.send(Method::GET, url, None).await?;
        Ok(envelope.template)
    }

    async fn fetch_credentials(&self, channel: &str, uid: &str) -> Result<MediaGrant, ApiError> {
        let url = format!(
            "{}/api/rtc-token?channel={}&uid={}",
            self.base_url,
            urlencoding::encode(channel),
            urlencoding::encode(uid)
        );
        self.send(Method::GET, url, None).await
    }
}
