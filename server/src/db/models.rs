use serde::{Deserialize, Serialize};

use crate::engine::agenda::Topic;

/// A stored debate room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoomRow {
    pub id: String,
    pub owner_id: String,
    pub owner_username: String,
    pub title: String,
    pub slug: String,
    /// Topic template id the room was created from.
    pub template: Option<String>,
    pub channel_name: String,
    pub status: String,
    pub is_public: bool,
    pub header_image_url: Option<String>,
    pub created_at: String,
    pub ended_at: Option<String>,
}

impl RoomRow {
    pub fn is_ended(&self) -> bool {
        self.status == RoomStatus::Ended.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Ended,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Ended => "ended",
        }
    }
}

/// A stored topic template. `topics` is the JSON-encoded topic list.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TopicTemplateRow {
    pub id: String,
    pub owner_id: String,
    pub owner_username: String,
    pub title: String,
    pub topics: String,
    pub created_at: String,
}

/// A topic template as served over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTemplate {
    pub id: String,
    pub owner_id: String,
    pub owner_username: String,
    pub title: String,
    pub topics: Vec<Topic>,
    pub created_at: String,
}

impl TryFrom<TopicTemplateRow> for TopicTemplate {
    type Error = serde_json::Error;

    fn try_from(row: TopicTemplateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            topics: serde_json::from_str(&row.topics)?,
            id: row.id,
            owner_id: row.owner_id,
            owner_username: row.owner_username,
            title: row.title,
            created_at: row.created_at,
        })
    }
}

/// A user record mirrored from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The name that prefixes a user's room URLs.
///
/// Username, else first name lowercased, else the e-mail local part, else `guest`.
pub fn owner_username(
    username: Option<&str>,
    full_name: Option<&str>,
    email: Option<&str>,
) -> String {
    fn non_blank(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(u) = non_blank(username) {
        return u.to_string();
    }
    if let Some(first) = non_blank(full_name).and_then(|n| n.split_whitespace().next()) {
        return first.to_lowercase();
    }
    if let Some(local) = non_blank(email).and_then(|e| e.split('@').next()).filter(|l| !l.is_empty()) {
        return local.to_string();
    }
    "guest".into()
}
