//! Append-only canonical event store.
//!
//! Events are keyed so that listing a user's prefix returns them in arrival
//! order. Nothing mutates or deletes a persisted event.

use metrics::counter;
use shared::{CanonicalEvent, RelayError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{ObjectStore, keys};

/// Durable record of normalized inbound events, keyed by resolved identity.
pub struct EventStore {
    store: Arc<dyn ObjectStore>,
}

impl EventStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Persists an event.
    ///
    /// # Errors
    /// Returns [`RelayError::Storage`] if the durable write fails.
    pub async fn append(&self, event: &CanonicalEvent) -> Result<(), RelayError> {
        let key = keys::event(
            &event.resolved_user_id,
            event.received_at.timestamp_millis(),
            event.id,
        );
        self.store.put(&key, &serde_json::to_value(event)?).await?;

        counter!("relay_events_persisted_total", "platform" => event.platform.as_str())
            .increment(1);
        debug!(event_id = %event.id, user_id = %event.resolved_user_id, "persisted event");
        Ok(())
    }

    /// Lists every event stored for `user_id`, oldest first.
    ///
    /// Unreadable records are skipped with a warning rather than failing the
    /// whole listing.
    ///
    /// # Errors
    /// Returns [`RelayError::Storage`] if the durable read fails.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<CanonicalEvent>, RelayError> {
        let listed = self.store.list(&keys::event_prefix(user_id)).await?;

        let mut events = Vec::with_capacity(listed.len());
        for (key, body) in listed {
            match serde_json::from_value::<CanonicalEvent>(body) {
                Ok(event) => events.push(event),
                Err(err) => warn!(key, error = %err, "skipping unreadable event record"),
            }
        }
        Ok(events)
    }
}
