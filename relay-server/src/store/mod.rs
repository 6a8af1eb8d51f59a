//! Durable object storage behind the mapping and event stores.
//!
//! The relay treats durability as an opaque collaborator with get/put/list
//! semantics over string keys and JSON bodies. Production runs on Postgres;
//! tests and no-database development run on the in-memory implementation.

use async_trait::async_trait;
use serde_json::Value;
use shared::RelayError;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Opaque durable key/object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the object stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, RelayError>;

    /// Stores `body` under `key`, replacing any previous object.
    async fn put(&self, key: &str, body: &Value) -> Result<(), RelayError>;

    /// Lists every `(key, body)` pair whose key starts with `prefix`, in
    /// ascending key order.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, RelayError>;
}

/// Key layout helpers shared by the mapping and event stores.
pub mod keys {
    use shared::Platform;
    use uuid::Uuid;

    /// Key of an OAuth identity mapping record.
    pub fn oauth_mapping(platform: Platform, oauth_user_id: &str) -> String {
        format!("mappings/{platform}/oauth/{oauth_user_id}")
    }

    /// Prefix covering every OAuth mapping of a platform.
    pub fn oauth_mapping_prefix(platform: Platform) -> String {
        format!("mappings/{platform}/oauth/")
    }

    /// Key of a username→sender-ids association record.
    pub fn username_association(platform: Platform, username: &str) -> String {
        format!("mappings/{platform}/username/{username}")
    }

    /// Key of a canonical event. The received-at millisecond component is
    /// zero-padded so lexicographic key order is chronological order.
    pub fn event(user_id: &str, received_at_ms: i64, event_id: Uuid) -> String {
        format!("events/{user_id}/{received_at_ms:016}/{event_id}")
    }

    /// Prefix covering every event of a user.
    pub fn event_prefix(user_id: &str) -> String {
        format!("events/{user_id}/")
    }
}
