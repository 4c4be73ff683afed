use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shortest transport-safe participant id.
pub const MIN_UID_LENGTH: usize = 4;

/// Longest transport-safe participant id.
pub const MAX_UID_LENGTH: usize = 48;

/// Display name used when nothing better is known.
pub const FALLBACK_DISPLAY_NAME: &str = "Guest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("a guest name is required before joining")]
    GuestNameRequired,
}

/// Who is sitting in front of this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated {
        user_id: String,
        full_name: Option<String>,
        username: Option<String>,
        avatar_url: Option<String>,
    },
    Guest {
        name: String,
    },
}

/// Stable participant id plus the name shown to others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub uid: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub user_id: Option<String>,
}

/// Derives participant ids for one session lifetime.
///
/// The session UUID is fixed at construction so resolving the same identity
/// twice yields the same uid; a new resolver (a reload) yields a new one.
#[derive(Debug)]
pub struct IdentityResolver {
    session_id: Uuid,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::with_session_id(Uuid::new_v4())
    }

    pub fn with_session_id(session_id: Uuid) -> Self {
        Self { session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn resolve(&self, identity: &Identity) -> Result<ResolvedIdentity, IdentityError> {
        match identity {
            Identity::Authenticated {
                user_id,
                full_name,
                username,
                avatar_url,
            } => {
                let uid = build_uid(&format!("user-{user_id}-{}", self.session_id));
                let display_name = first_non_blank(&[full_name.as_deref(), username.as_deref()])
                    .unwrap_or(FALLBACK_DISPLAY_NAME)
                    .to_string();
                Ok(ResolvedIdentity {
                    uid,
                    display_name,
                    avatar_url: avatar_url.clone(),
                    user_id: Some(user_id.clone()),
                })
            }
            Identity::Guest { name } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(IdentityError::GuestNameRequired);
                }
                Ok(ResolvedIdentity {
                    uid: build_uid(&format!("guest-{}", self.session_id)),
                    display_name: name.to_string(),
                    avatar_url: None,
                    user_id: None,
                })
            }
        }
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn first_non_blank<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

/// Turn an arbitrary candidate into a transport-safe id.
///
/// Keeps ASCII alphanumerics, `_` and `-`. When what remains is outside
/// 4..=48 characters, falls back to `u` + base36 of a 32-bit rolling hash
/// of the raw candidate, zero-padded to the minimum length, so the same
/// input always maps to the same id.
pub fn build_uid(raw: &str) -> String {
    let safe: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if (MIN_UID_LENGTH..=MAX_UID_LENGTH).contains(&safe.len()) {
        return safe;
    }

    let mut hash: i32 = 0;
    for unit in raw.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    let compact = to_base36(i64::from(hash).unsigned_abs());
    format!("u{compact:0>width$}", width = MIN_UID_LENGTH - 1)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

// ── Guest name preference ───────────────────────────────────────

/// The one local preference a session reads and writes.
pub trait GuestNameStore {
    fn load(&self) -> Option<String>;
    fn save(&mut self, name: &str);
}

#[derive(Debug, Default)]
pub struct MemoryGuestNameStore {
    name: Option<String>,
}

impl GuestNameStore for MemoryGuestNameStore {
    fn load(&self) -> Option<String> {
        self.name.clone()
    }

    fn save(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }
}

#[derive(Serialize, Deserialize, Default)]
struct StoredPreferences {
    #[serde(rename = "podium-guest-name", skip_serializing_if = "Option::is_none")]
    guest_name: Option<String>,
}

/// Guest name persisted in a small JSON file.
#[derive(Debug)]
pub struct FileGuestNameStore {
    path: PathBuf,
}

impl FileGuestNameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GuestNameStore for FileGuestNameStore {
    fn load(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredPreferences>(&contents) {
            Ok(prefs) => prefs.guest_name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ignoring unreadable preferences");
                None
            }
        }
    }

    fn save(&mut self, name: &str) {
        let prefs = StoredPreferences {
            guest_name: Some(name.trim().to_string()),
        };
        let result = serde_json::to_string(&prefs)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&self.path, json));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to persist guest name");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticated(user_id: &str) -> Identity {
        Identity::Authenticated {
            user_id: user_id.into(),
            full_name: None,
            username: Some("alice".into()),
            avatar_url: None,
        }
    }

    #[test]
    fn test_safe_candidate_is_kept() {
        assert_eq!(build_uid("guest-1234"), "guest-1234");
        assert_eq!(build_uid("a_b-c"), "a_b-c");
    }

    #[test]
    fn test_disallowed_characters_are_stripped() {
        assert_eq!(build_uid("user:42@host"), "user42host");
    }

    #[test]
    fn test_short_candidate_falls_back_to_hash() {
        assert_eq!(build_uid("ab"), "u2e9");
        // the hash covers the raw string, not the stripped one
        assert_eq!(build_uid("a!b"), "u20si");
    }

    #[test]
    fn test_long_candidate_falls_back_to_hash() {
        let raw = "x".repeat(80);
        let uid = build_uid(&raw);
        assert!(uid.starts_with('u'));
        assert!(uid.len() <= MAX_UID_LENGTH);
        assert_eq!(uid, build_uid(&raw));
    }

    #[test]
    fn test_fallback_is_transport_safe() {
        for raw in ["", "a", "ab", "!", "ünïcødé", &"é".repeat(60)] {
            let uid = build_uid(raw);
            assert!(uid.len() >= MIN_UID_LENGTH && uid.len() <= MAX_UID_LENGTH, "{uid}");
            assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_short_fallback_is_padded() {
        assert_eq!(build_uid(""), "u000");
        assert_eq!(build_uid("a"), "u02p");
        assert_eq!(build_uid("a"), build_uid("a"));
    }

    #[test]
    fn test_same_session_same_uid() {
        let resolver = IdentityResolver::new();
        let a = resolver.resolve(&authenticated("user_2abc")).unwrap();
        let b = resolver.resolve(&authenticated("user_2abc")).unwrap();
        assert_eq!(a.uid, b.uid);
    }

    #[test]
    fn test_new_session_new_uid() {
        let a = IdentityResolver::new()
            .resolve(&Identity::Guest { name: "Bo".into() })
            .unwrap();
        let b = IdentityResolver::new()
            .resolve(&Identity::Guest { name: "Bo".into() })
            .unwrap();
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let resolver = IdentityResolver::new();
        let id = Identity::Authenticated {
            user_id: "u1".into(),
            full_name: Some("Alice Liddell".into()),
            username: Some("alice".into()),
            avatar_url: Some("https://img/a.png".into()),
        };
        let resolved = resolver.resolve(&id).unwrap();
        assert_eq!(resolved.display_name, "Alice Liddell");
        assert_eq!(resolved.avatar_url.as_deref(), Some("https://img/a.png"));
        assert_eq!(resolved.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_display_name_falls_back_to_guest() {
        let resolver = IdentityResolver::new();
        let id = Identity::Authenticated {
            user_id: "u1".into(),
            full_name: Some("  ".into()),
            username: None,
            avatar_url: None,
        };
        assert_eq!(resolver.resolve(&id).unwrap().display_name, "Guest");
    }

    #[test]
    fn test_guest_without_name_is_rejected() {
        let resolver = IdentityResolver::new();
        let err = resolver
            .resolve(&Identity::Guest { name: "   ".into() })
            .unwrap_err();
        assert_eq!(err, IdentityError::GuestNameRequired);
    }

    #[test]
    fn test_guest_uid_has_guest_prefix() {
        let resolver = IdentityResolver::new();
        let resolved = resolver
            .resolve(&Identity::Guest { name: "Bo".into() })
            .unwrap();
        assert!(resolved.uid.starts_with("guest-"));
        assert_eq!(resolved.display_name, "Bo");
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let mut store = FileGuestNameStore::new(&path);
        assert_eq!(store.load(), None);
        store.save("  Bo ");
        assert_eq!(FileGuestNameStore::new(&path).load().as_deref(), Some("Bo"));
    }

    #[test]
    fn test_file_store_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileGuestNameStore::new(&path).load(), None);
    }
}
