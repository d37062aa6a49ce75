use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the persisted layout changes; older records are treated as invalid.
pub const SESSION_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the epoch; `None` for session cookies.
    pub expires: Option<f64>,
    pub secure: bool,
    pub http_only: bool,
}

/// Everything needed to put a fresh browser back into a logged-in state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrowserState {
    pub cookies: Vec<StoredCookie>,
    pub local_storage: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub format_version: u32,
    pub profile: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub state: BrowserState,
}

impl SessionRecord {
    pub fn new(profile: impl Into<String>, state: BrowserState, validity: Duration) -> Self {
        let now = Utc::now();
        Self {
            format_version: SESSION_FORMAT_VERSION,
            profile: profile.into(),
            created_at: now,
            expires_at: now + validity,
            revoked: false,
            state,
        }
    }

    /// Check the record is usable for `profile` at `now`.
    pub fn validate(&self, profile: &str, now: DateTime<Utc>) -> Result<(), String> {
        if self.format_version != SESSION_FORMAT_VERSION {
            return Err(format!(
                "format version {} (expected {})",
                self.format_version, SESSION_FORMAT_VERSION
            ));
        }
        if self.profile != profile {
            return Err(format!("record belongs to profile '{}'", self.profile));
        }
        if self.revoked {
            return Err("record was revoked".to_string());
        }
        if self.expires_at <= now {
            return Err(format!("record expired at {}", self.expires_at));
        }
        if self.created_at > now {
            return Err("record is dated in the future".to_string());
        }
        if self.state.cookies.is_empty() {
            return Err("record carries no cookies".to_string());
        }
        Ok(())
    }
}
