use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Validity window of a session token, in seconds.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

pub fn token_ttl() -> Duration {
    Duration::seconds(TOKEN_TTL_SECS)
}

/// Resource ids a session token grants access to.
///
/// A target is missing while its id is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantTargets {
    /// Conversations service id
    pub messaging: String,
    /// Voice app id; inbound calls are always allowed
    pub voice: String,
    /// Call-history store id
    pub call_history: String,
}

impl GrantTargets {
    /// Names of grants whose target id is empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.messaging.is_empty() {
            missing.push("messaging");
        }
        if self.voice.is_empty() {
            missing.push("voice");
        }
        if self.call_history.is_empty() {
            missing.push("call-history");
        }
        missing
    }
}

/// A signed token issued to the local client.
///
/// Immutable once issued. A newer token supersedes an older one; there is no
/// revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub value: String,
    pub identity: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub grants: GrantTargets,
}

impl SessionToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
