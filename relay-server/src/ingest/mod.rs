//! Platform envelope normalization.
//!
//! Webhook payloads arrive shaped per platform convention: an object
//! discriminator plus nested entries carrying messaging or comment
//! sub-objects. This module flattens them into [`InboundEntry`] values the
//! ingestion pipeline can process uniformly. An envelope whose discriminator
//! does not match the platform is rejected outright; individual sub-entries
//! missing required ids are skipped with a warning so one bad entry never
//! poisons its batch.

use serde_json::Value;
use shared::{EventKind, MediaRef, Platform, RelayError};
use tracing::warn;

/// One normalized message or comment extracted from a webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEntry {
    /// Message or comment.
    pub kind: EventKind,
    /// Raw sender id from the platform.
    pub sender_id: String,
    /// Recipient (page/account) id the event was addressed to.
    pub recipient_id: String,
    /// Text content; empty if the platform sent none.
    pub text: String,
    /// Media attachments.
    pub media: Vec<MediaRef>,
    /// Platform-reported timestamp in milliseconds.
    pub timestamp_ms: i64,
}

impl InboundEntry {
    /// Whether the entry refers to itself (sender equals recipient). These
    /// are echoes of the account's own activity and never become events.
    pub fn is_self_referential(&self) -> bool {
        self.sender_id == self.recipient_id
    }
}

/// Parses a platform webhook envelope into normalized entries.
///
/// # Errors
/// Returns [`RelayError::MalformedPayload`] when the object discriminator is
/// missing or does not match `platform`.
pub fn parse_envelope(platform: Platform, body: &Value) -> Result<Vec<InboundEntry>, RelayError> {
    let object = body
        .get("object")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::MalformedPayload("missing object discriminator".into()))?;

    if object != platform.descriptor().webhook_object {
        return Err(RelayError::MalformedPayload(format!(
            "object '{object}' does not belong to {platform}"
        )));
    }

    let entries = body
        .get("entry")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::MalformedPayload("missing entry array".into()))?;

    let mut parsed = Vec::new();
    for entry in entries {
        let entry_time = entry.get("time").and_then(Value::as_i64).unwrap_or(0);
        let entry_id = entry.get("id").and_then(Value::as_str).unwrap_or_default();

        if let Some(messaging) = entry.get("messaging").and_then(Value::as_array) {
            for item in messaging {
                match parse_messaging_item(item) {
                    Some(inbound) => parsed.push(inbound),
                    None => warn!(%platform, "skipping malformed messaging entry"),
                }
            }
        }

        if let Some(changes) = entry.get("changes").and_then(Value::as_array) {
            for change in changes {
                // Only comment changes become events; other change fields
                // (mentions, story insights) are not ingested.
                if change.get("field").and_then(Value::as_str) != Some("comments") {
                    continue;
                }
                match parse_comment_change(change, entry_id, entry_time) {
                    Some(inbound) => parsed.push(inbound),
                    None => warn!(%platform, "skipping malformed change entry"),
                }
            }
        }
    }

    Ok(parsed)
}

fn parse_messaging_item(item: &Value) -> Option<InboundEntry> {
    let sender_id = item.pointer("/sender/id")?.as_str()?;
    let recipient_id = item.pointer("/recipient/id")?.as_str()?;
    let message = item.get("message")?;

    let text = message
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let media = message
        .get("attachments")
        .and_then(Value::as_array)
        .map(|attachments| {
            attachments
                .iter()
                .filter_map(|attachment| attachment.pointer("/payload/url")?.as_str())
                .map(|url| MediaRef {
                    url: url.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundEntry {
        kind: EventKind::Message,
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.to_string(),
        text: text.to_string(),
        media,
        timestamp_ms: item.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
    })
}

fn parse_comment_change(change: &Value, entry_id: &str, entry_time: i64) -> Option<InboundEntry> {
    let value = change.get("value")?;
    let sender_id = value.pointer("/from/id")?.as_str()?;
    if entry_id.is_empty() {
        return None;
    }

    Some(InboundEntry {
        kind: EventKind::Comment,
        sender_id: sender_id.to_string(),
        recipient_id: entry_id.to_string(),
        text: value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        media: Vec::new(),
        timestamp_ms: entry_time,
    })
}
