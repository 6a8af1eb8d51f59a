use async_trait::async_trait;
use serde_json::Value;
use shared::RelayError;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::ObjectStore;

/// In-memory object store used when no database is configured and in tests.
///
/// A `BTreeMap` keeps keys ordered so `list` matches the Postgres
/// implementation's ascending key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, RelayError> {
        let guard = self.objects.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn put(&self, key: &str, body: &Value) -> Result<(), RelayError> {
        let mut guard = self.objects.write().await;
        guard.insert(key.to_string(), body.clone());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, RelayError> {
        let guard = self.objects.read().await;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| (key.clone(), body.clone()))
            .collect())
    }
}
