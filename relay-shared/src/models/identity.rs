use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::platform::Platform;

/// Durable association between a platform's OAuth account and the relay's
/// identity for it.
///
/// Created on the first successful identity probe, updated on every
/// subsequent probe, never deleted. `oauth_user_id` is unique per platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityMapping {
    /// Platform this mapping belongs to.
    pub platform: Platform,

    /// OAuth account id the platform issued at connect time.
    pub oauth_user_id: String,

    /// Platform-native account id reported by the identity probe. Webhook
    /// recipient ids resolve against this as well as `oauth_user_id`.
    pub account_id: String,

    /// Username reported by the identity probe.
    pub username: String,

    /// Credential used for identity probes on behalf of this account.
    pub credential: String,

    /// When the mapping was first created.
    pub created_at: DateTime<Utc>,

    /// When the mapping was last refreshed by a probe.
    pub updated_at: DateTime<Utc>,
}

/// Durable association between a username and every webhook sender id ever
/// observed for it.
///
/// The sender-id list is append-only and insertion-ordered; ids are never
/// removed, and lookups by username return the last-appended id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsernameAssociation {
    /// Platform this association belongs to.
    pub platform: Platform,

    /// Username the sender ids accumulate under.
    pub username: String,

    /// Webhook sender ids in order of first observation.
    pub webhook_sender_ids: Vec<String>,

    /// When the association was first created.
    pub created_at: DateTime<Utc>,

    /// When a sender id was last appended.
    pub updated_at: DateTime<Utc>,
}

impl UsernameAssociation {
    /// Starts a new association containing a single sender id.
    pub fn new(platform: Platform, username: impl Into<String>, sender_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            platform,
            username: username.into(),
            webhook_sender_ids: vec![sender_id.into()],
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a sender id if it is not already present. Returns whether the
    /// list changed.
    pub fn append_sender_id(&mut self, sender_id: &str) -> bool {
        if self.webhook_sender_ids.iter().any(|id| id == sender_id) {
            return false;
        }
        self.webhook_sender_ids.push(sender_id.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// The most-recently-appended sender id, if any.
    pub fn latest_sender_id(&self) -> Option<&str> {
        self.webhook_sender_ids.last().map(String::as_str)
    }
}
