use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::RtcConfig;
use crate::engine::media::RtcCredentials;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("media credentials are not configured")]
    NotConfigured,
    #[error("token is not valid for {0}")]
    WrongScope(&'static str),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// JWT claims for web session tokens issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,    // expiry (unix timestamp)
    pub iat: i64,    // issued at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Profile fields carried in a session token.
#[derive(Debug, Clone, Default)]
pub struct SessionProfile<'a> {
    pub username: Option<&'a str>,
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
}

/// Create a JWT session token for a user.
pub fn create_session_token(
    user_id: &str,
    profile: &SessionProfile<'_>,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
        username: profile.username.map(str::to_string),
        name: profile.name.map(str::to_string),
        email: profile.email.map(str::to_string),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT session token and return the claims.
pub fn validate_session_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// What a media-plane token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenScope {
    /// Audio/video transport join.
    Rtc,
    /// Messaging channel login.
    Rtm,
}

impl TokenScope {
    fn as_str(self) -> &'static str {
        match self {
            TokenScope::Rtc => "rtc",
            TokenScope::Rtm => "rtm",
        }
    }
}

/// Claims of a media or messaging token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaClaims {
    pub sub: String, // participant uid
    pub app: String,
    pub channel: String,
    pub scope: TokenScope,
    pub exp: i64,
    pub iat: i64,
}

/// Tokens for one channel and uid, as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaGrant {
    pub app_id: String,
    pub channel: String,
    pub uid: String,
    pub rtc_token: String,
    pub rtm_token: String,
    pub expires_in: u64,
}

impl MediaGrant {
    pub fn rtc_credentials(&self) -> RtcCredentials {
        RtcCredentials {
            app_id: self.app_id.clone(),
            channel: self.channel.clone(),
            token: self.rtc_token.clone(),
            uid: self.uid.clone(),
        }
    }
}

fn sign_media_token(
    app_id: &str,
    certificate: &str,
    channel: &str,
    uid: &str,
    scope: TokenScope,
    ttl_secs: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX / 2);
    let claims = MediaClaims {
        sub: uid.to_string(),
        app: app_id.to_string(),
        channel: channel.to_string(),
        scope,
        exp: (now + Duration::seconds(ttl)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(certificate.as_bytes()),
    )
}

/// Issue the audio/video and messaging tokens for `uid` on `channel`.
pub fn issue_media_grant(rtc: &RtcConfig, channel: &str, uid: &str) -> Result<MediaGrant, TokenError> {
    let (app_id, certificate) = rtc.credentials().ok_or(TokenError::NotConfigured)?;
    let ttl = rtc.token_ttl_secs;
    Ok(MediaGrant {
        app_id: app_id.to_string(),
        channel: channel.to_string(),
        uid: uid.to_string(),
        rtc_token: sign_media_token(app_id, certificate, channel, uid, TokenScope::Rtc, ttl)?,
        rtm_token: sign_media_token(app_id, certificate, channel, uid, TokenScope::Rtm, ttl)?,
        expires_in: ttl,
    })
}

/// Check a token was issued for `scope` by this app and return its claims.
pub fn validate_media_token(
    token: &str,
    rtc: &RtcConfig,
    scope: TokenScope,
) -> Result<MediaClaims, TokenError> {
    let (app_id, certificate) = rtc.credentials().ok_or(TokenError::NotConfigured)?;
    let claims = decode::<MediaClaims>(
        token,
        &DecodingKey::from_secret(certificate.as_bytes()),
        &Validation::default(),
    )?
    .claims;
    if claims.scope != scope || claims.app != app_id {
        return Err(TokenError::WrongScope(scope.as_str()));
    }
    Ok(claims)
}
