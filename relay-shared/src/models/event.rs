use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use super::platform::Platform;

/// The kind of inbound event a platform delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A direct message.
    Message,
    /// A comment on a post.
    Comment,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EventKind::Message => write!(f, "message"),
            EventKind::Comment => write!(f, "comment"),
        }
    }
}

/// A media attachment carried by an inbound event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    /// URL of the attachment as delivered by the platform.
    pub url: String,
}

/// Platform-agnostic normalized record of an inbound message or comment.
///
/// Immutable once persisted: the gateway constructs it, the event store
/// appends it, and nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalEvent {
    /// Unique identifier assigned at ingestion.
    pub id: Uuid,

    /// Platform the event originated from.
    pub platform: Platform,

    /// Whether the event is a message or a comment.
    pub kind: EventKind,

    /// Internal identity the event was resolved to.
    pub resolved_user_id: String,

    /// Sender identifier exactly as the platform delivered it.
    pub raw_sender_id: String,

    /// Text content of the message or comment.
    pub text: String,

    /// Media attachments, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,

    /// Platform-reported timestamp in milliseconds since the epoch.
    pub platform_timestamp: i64,

    /// When the relay received the event.
    pub received_at: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Builds a new event stamped with a fresh id and the current time.
    pub fn new(
        platform: Platform,
        kind: EventKind,
        resolved_user_id: impl Into<String>,
        raw_sender_id: impl Into<String>,
        text: impl Into<String>,
        platform_timestamp: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            kind,
            resolved_user_id: resolved_user_id.into(),
            raw_sender_id: raw_sender_id.into(),
            text: text.into(),
            media: Vec::new(),
            platform_timestamp,
            received_at: Utc::now(),
        }
    }

    /// Attaches media references, consuming and returning the event.
    #[must_use]
    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trip() {
        let event = CanonicalEvent::new(
            Platform::Instagram,
            EventKind::Message,
            "1000",
            "2000",
            "hi",
            100,
        )
        .with_media(vec![MediaRef {
            url: "https://cdn.example.com/a.jpg".into(),
        }]);

        let serialized = serde_json::to_string(&event).unwrap();
        let deserialized: CanonicalEvent = serde_json::from_str(&serialized).unwrap();

        assert_eq!(event, deserialized);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EventKind::Message).unwrap(), "\"message\"");
        assert_eq!(serde_json::to_string(&EventKind::Comment).unwrap(), "\"comment\"");
    }

    #[test]
    fn media_omitted_when_empty() {
        let event = CanonicalEvent::new(
            Platform::Facebook,
            EventKind::Comment,
            "10",
            "20",
            "nice post",
            0,
        );
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("media").is_none());
    }
}
