use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Control and chat messages carried on a room's messaging channel.
///
/// Serialised as JSON objects tagged by `type`, e.g.
/// `{"type":"stage_update","uid":"abcd","onStage":true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// A participant announces its display name.
    Introduce { uid: String, name: String },

    /// A participant asks the owner for permission to publish.
    RequestJoin {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// The owner grants publish permission.
    ApproveJoin { uid: String },

    /// A participant was placed on or taken off the stage.
    StageUpdate {
        uid: String,
        #[serde(rename = "onStage", default)]
        on_stage: bool,
    },

    /// The owner asks a participant to mute their microphone.
    Mute { uid: String },

    /// A chat line.
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
        #[serde(default)]
        message: String,
    },
}

impl ChannelMessage {
    pub fn to_json(&self) -> String {
        // Serialising a plain enum of strings and bools cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The participant this message is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            ChannelMessage::Introduce { uid, .. }
            | ChannelMessage::RequestJoin { uid, .. }
            | ChannelMessage::ApproveJoin { uid }
            | ChannelMessage::StageUpdate { uid, .. }
            | ChannelMessage::Mute { uid } => Some(uid),
            ChannelMessage::Chat { .. } => None,
        }
    }
}

/// One message as delivered by the channel, with the transport's view of who sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub channel: String,
    pub publisher: String,
    pub message: String,
}

/// What a raw delivery turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Control(ChannelMessage),
    /// Not a typed envelope at all; shown as chat from the publisher.
    PlainText { publisher: String, text: String },
    /// Typed, but not a type (or shape) this client understands.
    Unrecognized { kind: String },
}

/// Classify a raw payload. Never drops non-JSON text: it becomes chat.
pub fn parse_inbound(raw: &str, publisher: &str) -> Inbound {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return plain(raw, publisher),
    };

    let Some(kind) = value.get("type").and_then(|t| t.as_str()).map(str::to_string) else {
        return plain(raw, publisher);
    };

    match serde_json::from_value::<ChannelMessage>(value) {
        Ok(msg) => Inbound::Control(msg),
        Err(e) => {
            debug!(%publisher, %kind, error = %e, "unrecognized channel message");
            Inbound::Unrecognized { kind }
        }
    }
}

fn plain(raw: &str, publisher: &str) -> Inbound {
    Inbound::PlainText {
        publisher: publisher.to_string(),
        text: raw.to_string(),
    }
}

/// A line in the session's chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub author: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only chat history for one live session.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn push(&mut self, author: impl Into<String>, message: impl Into<String>) -> &ChatMessage {
        self.messages.push(ChatMessage {
            id: Uuid::new_v4(),
            author: author.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
