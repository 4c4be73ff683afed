use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Largest clock difference accepted between sender and us (seconds).
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("webhook secret is malformed")]
    BadSecret,
    #[error("timestamp outside tolerance")]
    StaleTimestamp,
    #[error("signature mismatch")]
    InvalidSignature,
}

fn secret_key(secret: &str) -> Result<Vec<u8>, WebhookError> {
    let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
    STANDARD.decode(encoded).map_err(|_| WebhookError::BadSecret)
}

fn mac_for(key: &[u8], id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| WebhookError::BadSecret)?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Produce a `v1,<base64>` signature for a payload.
pub fn sign(secret: &str, id: &str, timestamp: &str, body: &[u8]) -> Result<String, WebhookError> {
    let key = secret_key(secret)?;
    let digest = mac_for(&key, id, timestamp, body)?.finalize().into_bytes();
    Ok(format!("v1,{}", STANDARD.encode(digest)))
}

/// Verify a signed webhook delivery.
///
/// `signatures` is the space-separated `v1,<base64>` list from the signature
/// header; any one matching entry is enough.
pub fn verify(
    secret: &str,
    id: &str,
    timestamp: &str,
    signatures: &str,
    body: &[u8],
    now: i64,
) -> Result<(), WebhookError> {
    let sent_at: i64 = timestamp.parse().map_err(|_| WebhookError::StaleTimestamp)?;
    if (now - sent_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::StaleTimestamp);
    }

    let key = secret_key(secret)?;
    for candidate in signatures.split_whitespace() {
        let Some(encoded) = candidate.strip_prefix("v1,") else {
            continue;
        };
        let Ok(expected) = STANDARD.decode(encoded) else {
            continue;
        };
        if mac_for(&key, id, timestamp, body)?.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(WebhookError::InvalidSignature)
}

/// A user lifecycle event from the identity provider.
#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: IdentityUser,
}

impl IdentityEvent {
    /// Whether this event should create or refresh a local user record.
    pub fn is_user_upsert(&self) -> bool {
        matches!(self.kind.as_str(), "user.created" | "user.updated")
    }
}

#[derive(Debug, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub primary_email_address_id: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
}

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    pub id: String,
    pub email_address: String,
}

impl IdentityUser {
    /// First and last name joined, or `None` when both are blank.
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    /// The primary address, else the first one listed.
    pub fn primary_email(&self) -> Option<&str> {
        let primary = self
            .primary_email_address_id
            .as_deref()
            .and_then(|id| self.email_addresses.iter().find(|e| e.id == id));
        primary
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.as_str())
    }
}
