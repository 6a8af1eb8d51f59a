use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::errors::RelayError;

/// A social-media platform the relay ingests events from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Instagram direct messages and comments.
    Instagram,
    /// Facebook page messages and comments.
    Facebook,
    /// Twitter/X direct messages and mentions.
    Twitter,
}

impl Platform {
    /// Every platform the relay knows about.
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Facebook, Platform::Twitter];

    /// Lowercase identifier used in URLs, storage keys, and webhook envelopes.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Twitter => "twitter",
        }
    }

    /// Static descriptor for this platform.
    ///
    /// The descriptor table replaces per-platform conditional chains: code that
    /// needs a platform-specific field name or endpoint looks it up here
    /// instead of branching on the enum.
    pub const fn descriptor(&self) -> &'static PlatformDescriptor {
        match self {
            Platform::Instagram => &PlatformDescriptor {
                status_field: "hasEnteredInstagramUsername",
                username_field: "instagramUsername",
                identity_endpoint: "https://graph.instagram.com",
                webhook_object: "instagram",
            },
            Platform::Facebook => &PlatformDescriptor {
                status_field: "hasEnteredFacebookUsername",
                username_field: "facebookUsername",
                identity_endpoint: "https://graph.facebook.com",
                webhook_object: "page",
            },
            Platform::Twitter => &PlatformDescriptor {
                status_field: "hasEnteredTwitterUsername",
                username_field: "twitterUsername",
                identity_endpoint: "https://api.twitter.com",
                webhook_object: "tweet_create_events",
            },
        }
    }

    /// Finds the platform whose webhook envelope uses the given object
    /// discriminator.
    pub fn from_webhook_object(object: &str) -> Option<Platform> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.descriptor().webhook_object == object)
    }

    /// Profile fields announcing a linked username, keyed by the platform's
    /// historical field names.
    pub fn profile_fields(&self, username: &str) -> Value {
        let descriptor = self.descriptor();
        json!({
            descriptor.status_field: true,
            descriptor.username_field: username,
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == value)
            .ok_or_else(|| RelayError::NotFound(format!("unknown platform '{value}'")))
    }
}

/// Platform-specific names and endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformDescriptor {
    /// Profile field marking that the user has linked a username.
    pub status_field: &'static str,
    /// Profile field holding the linked username.
    pub username_field: &'static str,
    /// Base URL of the platform's identity-lookup API.
    pub identity_endpoint: &'static str,
    /// Object discriminator the platform sends in webhook envelopes.
    pub webhook_object: &'static str,
}
