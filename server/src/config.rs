use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::auth::config::{AuthConfig, DEFAULT_TOKEN_TTL_SECS, RtcConfig};
use crate::engine::room_session::SessionOptions;
use crate::engine::validation::MAX_CHAT_LENGTH;

/// Top-level server configuration, loaded from podium.toml.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub rtc: RtcSection,
    pub session: SessionSection,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Directory holding the built front-end; unmatched routes serve its index.html.
    pub static_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            static_dir: "static".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:podium.db?mode=rwc".into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
    pub public_url: String,
    pub webhook_secret: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: "podium-dev-secret-change-me".into(),
            session_expiry_hours: 720,
            public_url: "http://localhost:8080".into(),
            webhook_secret: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct RtcSection {
    pub app_id: Option<String>,
    pub app_certificate: Option<String>,
    pub token_ttl_secs: u64,
}

impl Default for RtcSection {
    fn default() -> Self {
        Self {
            app_id: None,
            app_certificate: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// How often an unapproved participant repeats its join request.
    pub join_request_resend_secs: u64,
    pub max_chat_length: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            join_request_resend_secs: 15,
            max_chat_length: MAX_CHAT_LENGTH,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("STATIC_DIR") {
            self.server.static_dir = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("SESSION_EXPIRY_HOURS")
            && let Ok(hours) = v.parse()
        {
            self.auth.session_expiry_hours = hours;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.auth.public_url = v;
        }
        if let Ok(v) = std::env::var("IDENTITY_WEBHOOK_SECRET")
            && !v.is_empty()
        {
            self.auth.webhook_secret = Some(v);
        }
        if let Ok(v) = std::env::var("RTC_APP_ID")
            && !v.is_empty()
        {
            self.rtc.app_id = Some(v);
        }
        if let Ok(v) = std::env::var("RTC_APP_CERTIFICATE")
            && !v.is_empty()
        {
            self.rtc.app_certificate = Some(v);
        }
        if let Ok(v) = std::env::var("RTC_TOKEN_TTL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.rtc.token_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("JOIN_REQUEST_RESEND_SECS")
            && let Ok(secs) = v.parse()
        {
            self.session.join_request_resend_secs = secs;
        }
    }

    /// Convert into an AuthConfig for the auth layer.
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            session_expiry_hours: self.auth.session_expiry_hours,
            public_url: self.auth.public_url.clone(),
            webhook_secret: self.auth.webhook_secret.clone().filter(|s| !s.is_empty()),
        }
    }

    pub fn to_rtc_config(&self) -> RtcConfig {
        RtcConfig {
            app_id: self.rtc.app_id.clone().filter(|s| !s.is_empty()),
            app_certificate: self.rtc.app_certificate.clone().filter(|s| !s.is_empty()),
            token_ttl_secs: self.rtc.token_ttl_secs,
        }
    }

    pub fn to_session_options(&self) -> SessionOptions {
        SessionOptions {
            join_request_resend: Duration::from_secs(self.session.join_request_resend_secs.max(1)),
            max_chat_length: self.session.max_chat_length,
        }
    }
}
