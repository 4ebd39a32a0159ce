//! Core data model: identities, profile snapshots, moderation lists.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decentralized identifier. Wrapped rather than passed as a bare
/// `String` so queues and maps are keyed by a distinguishable type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Did(pub String);

impl Did {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Did {
    fn from(s: String) -> Self {
        Did(s)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Did(s.to_string())
    }
}

/// A cached profile snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub did: Did,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub follows_count: u64,
    #[serde(default)]
    pub followers_count: u64,
    pub cached_at: DateTime<Utc>,
}

impl Profile {
    /// A profile has no resolvable handle yet (account exists but the
    /// firehose DID has not been paired with profile data).
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }
}

/// Stable key identifying a moderation list independent of its remote URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListKey(pub String);

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single configured moderation list and its rule thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDescriptor {
    pub key: ListKey,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub uri: Option<String>,
    pub follows_threshold: Option<u64>,
    pub followers_threshold: Option<u64>,
    pub require_unverified_follow_count: bool,
    #[serde(default)]
    pub word_list_path: Option<String>,
    #[serde(default)]
    pub exceptions_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_display_round_trips_string() {
        let did: Did = "did:plc:abc123".into();
        assert_eq!(did.to_string(), "did:plc:abc123");
        assert_eq!(did.as_str(), "did:plc:abc123");
    }

    #[test]
    fn profile_without_handle_reports_false() {
        let p = Profile {
            did: "did:plc:x".into(),
            handle: None,
            display_name: None,
            description: None,
            follows_count: 0,
            followers_count: 0,
            cached_at: Utc::now(),
        };
        assert!(!p.has_handle());
    }
}
