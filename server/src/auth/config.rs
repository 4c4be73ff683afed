/// Session authentication configuration, loaded from environment variables.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
    pub public_url: String,
    /// `whsec_`-prefixed signing secret for identity-provider webhooks.
    pub webhook_secret: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "podium-dev-secret-change-me".to_string()),
            session_expiry_hours: std::env::var("SESSION_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(720), // 30 days
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            webhook_secret: non_empty_env("IDENTITY_WEBHOOK_SECRET"),
        }
    }
}

/// Real-time transport app credentials used to sign media and messaging tokens.
#[derive(Clone)]
pub struct RtcConfig {
    pub app_id: Option<String>,
    pub app_certificate: Option<String>,
    pub token_ttl_secs: u64,
}

/// Media and messaging tokens live for one hour.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

impl RtcConfig {
    pub fn from_env() -> Self {
        Self {
            app_id: non_empty_env("RTC_APP_ID"),
            app_certificate: non_empty_env("RTC_APP_CERTIFICATE"),
            token_ttl_secs: std::env::var("RTC_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    /// App id and certificate, if both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.app_id, &self.app_certificate) {
            (Some(id), Some(cert)) => Some((id.as_str(), cert.as_str())),
            _ => None,
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_certificate: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
