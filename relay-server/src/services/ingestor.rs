//! Ingestion pipeline.
//!
//! The webhook handler acknowledges the platform as soon as the envelope
//! shape is validated; this pipeline then runs on a background task for each
//! batch. Per entry: resolve the canonical identity (fallback-tolerant),
//! discard self-referential echoes, opportunistically refresh the
//! sender→username mapping, persist with bounded retry (dead-letter on
//! exhaustion), invalidate the affected cache category, and fan out through
//! the delivery hub.

use metrics::counter;
use shared::{CanonicalEvent, Platform};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ingest::InboundEntry;

use super::cache::ResponseCache;
use super::delivery_hub::DeliveryHub;
use super::event_store::EventStore;
use super::mapping_store::MappingStore;
use super::retry::{DeadLetterLog, RetryPolicy, run_with_retry};

/// Cache category holding per-user event listings.
pub const EVENT_LIST_CATEGORY: &str = "event_list";

/// Background half of the webhook ingestion gateway.
pub struct Ingestor {
    mappings: Arc<MappingStore>,
    events: Arc<EventStore>,
    cache: Arc<ResponseCache>,
    hub: Arc<DeliveryHub>,
    dead_letters: Arc<DeadLetterLog>,
    retry_policy: RetryPolicy,
}

impl Ingestor {
    pub fn new(
        mappings: Arc<MappingStore>,
        events: Arc<EventStore>,
        cache: Arc<ResponseCache>,
        hub: Arc<DeliveryHub>,
        dead_letters: Arc<DeadLetterLog>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            mappings,
            events,
            cache,
            hub,
            dead_letters,
            retry_policy,
        }
    }

    /// Processes a batch of normalized entries from one webhook delivery.
    pub async fn process_batch(&self, platform: Platform, entries: Vec<InboundEntry>) {
        for entry in entries {
            self.process_entry(platform, entry).await;
        }
    }

    async fn process_entry(&self, platform: Platform, entry: InboundEntry) {
        if entry.is_self_referential() {
            counter!("relay_events_discarded_total", "reason" => "self_referential")
                .increment(1);
            debug!(%platform, sender_id = %entry.sender_id, "discarding self-referential entry");
            return;
        }

        let resolved_user_id = self
            .mappings
            .resolve_oauth_id(platform, &entry.recipient_id)
            .await;

        // Best-effort mapping refresh: a probe failure must not block the
        // event itself.
        if let Some(credential) = self.mappings.credential_for(platform, &resolved_user_id).await {
            if let Err(err) = self
                .mappings
                .save_webhook_mapping(platform, &entry.sender_id, &credential)
                .await
            {
                warn!(%platform, sender_id = %entry.sender_id, error = %err,
                    "sender mapping refresh failed; continuing");
            }
        }

        let event = CanonicalEvent::new(
            platform,
            entry.kind,
            resolved_user_id,
            entry.sender_id,
            entry.text,
            entry.timestamp_ms,
        )
        .with_media(entry.media);

        let persisted = run_with_retry(self.retry_policy, "persist_event", || {
            let events = Arc::clone(&self.events);
            let event = event.clone();
            async move { events.append(&event).await }
        })
        .await;

        if let Err(err) = persisted {
            let payload = serde_json::to_value(&event)
                .unwrap_or_else(|_| serde_json::json!({"event_id": event.id.to_string()}));
            self.dead_letters.push("persist_event", payload, &err);
            // Not persisted, but live subscribers still get the event; the
            // listing will lack it until a platform redelivery.
        } else {
            self.cache
                .invalidate(EVENT_LIST_CATEGORY, Some(&[event.resolved_user_id.as_str()]))
                .await;
        }

        self.hub.publish(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identity_probe::testing::ScriptedProbe;
    use crate::services::identity_probe::{IdentityProbe, ProbeIdentity};
    use crate::store::{MemoryStore, ObjectStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use shared::{EventKind, RelayError};
    use std::time::Duration;

    fn entry(sender: &str, recipient: &str, text: &str) -> InboundEntry {
        InboundEntry {
            kind: EventKind::Message,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            text: text.to_string(),
            media: Vec::new(),
            timestamp_ms: 100,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    struct Fixture {
        ingestor: Ingestor,
        events: Arc<EventStore>,
        hub: Arc<DeliveryHub>,
        dead_letters: Arc<DeadLetterLog>,
        mappings: Arc<MappingStore>,
    }

    fn fixture_with_store(store: Arc<dyn ObjectStore>) -> Fixture {
        let probe = Arc::new(ScriptedProbe::new());
        probe.on_self(shared::Platform::Instagram, "token", ProbeIdentity {
            account_id: "1000".into(),
            username: "owner".into(),
        });
        probe.on_sender(shared::Platform::Instagram, "2000", ProbeIdentity {
            account_id: "2000".into(),
            username: "jess".into(),
        });

        let mappings = Arc::new(MappingStore::new(
            Arc::clone(&store),
            probe as Arc<dyn IdentityProbe>,
        ));
        let events = Arc::new(EventStore::new(store));
        let cache = Arc::new(ResponseCache::new(&shared::config::CacheConfig::default()));
        let hub = Arc::new(DeliveryHub::new(8));
        let dead_letters = Arc::new(DeadLetterLog::new(16));

        let ingestor = Ingestor::new(
            Arc::clone(&mappings),
            Arc::clone(&events),
            cache,
            Arc::clone(&hub),
            Arc::clone(&dead_letters),
            fast_policy(),
        );

        Fixture {
            ingestor,
            events,
            hub,
            dead_letters,
            mappings,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn entry_becomes_persisted_and_published_event() {
        let fx = fixture();
        fx.mappings
            .save_oauth_mapping(shared::Platform::Instagram, "1000", "token")
            .await
            .unwrap();

        let (_id, mut receiver) = fx.hub.subscribe("1000").await;

        fx.ingestor
            .process_batch(shared::Platform::Instagram, vec![entry("2000", "1000", "hi")])
            .await;

        let listed = fx.events.list_for_user("1000").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].resolved_user_id, "1000");
        assert_eq!(listed[0].raw_sender_id, "2000");
        assert_eq!(listed[0].text, "hi");

        let frame = receiver.recv().await.unwrap();
        assert!(frame.data.contains("\"hi\""));

        // The opportunistic mapping refresh recorded the sender.
        assert_eq!(
            fx.mappings
                .resolve_webhook_id_by_username(shared::Platform::Instagram, "jess")
                .await,
            Some("2000".to_string())
        );
    }

    #[tokio::test]
    async fn self_referential_entries_produce_nothing() {
        let fx = fixture();

        fx.ingestor
            .process_batch(
                shared::Platform::Instagram,
                vec![entry("1000", "1000", "echo")],
            )
            .await;

        assert!(fx.events.list_for_user("1000").await.unwrap().is_empty());
        assert!(fx.dead_letters.is_empty());
    }

    #[tokio::test]
    async fn unmapped_recipient_falls_back_to_recipient_id() {
        let fx = fixture();

        fx.ingestor
            .process_batch(
                shared::Platform::Instagram,
                vec![entry("2000", "9999", "hello")],
            )
            .await;

        let listed = fx.events.list_for_user("9999").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].resolved_user_id, "9999");
    }

    struct FailingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, RelayError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, body: &Value) -> Result<(), RelayError> {
            if key.starts_with("events/") {
                return Err(RelayError::Storage("simulated outage".into()));
            }
            self.inner.put(key, body).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, RelayError> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn exhausted_persistence_dead_letters_but_still_publishes() {
        let fx = fixture_with_store(Arc::new(FailingStore {
            inner: MemoryStore::new(),
        }));
        let (_id, mut receiver) = fx.hub.subscribe("1000").await;

        fx.ingestor
            .process_batch(
                shared::Platform::Instagram,
                vec![entry("2000", "1000", "lost")],
            )
            .await;

        assert_eq!(fx.dead_letters.len(), 1);
        let letter = &fx.dead_letters.snapshot()[0];
        assert_eq!(letter.operation, "persist_event");
        assert!(letter.reason.contains("simulated outage"));

        // Live subscribers still received the event.
        let frame = receiver.recv().await.unwrap();
        assert!(frame.data.contains("lost"));
    }
}
