//! Generic TTL response cache.
//!
//! Entries are keyed by category plus a SHA-256 hash of the request
//! parameters. Expiry is per category, eviction under capacity pressure
//! removes the oldest-created ~10% of entries (approximate by design, not
//! LRU), and a background sweep clears expired entries on a fixed interval.
//! The cache tracks no dependencies: writers that affect cached reads call
//! `invalidate` themselves.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use serde_json::Value;
use sha2::{Digest, Sha256};
use shared::config::CacheConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    category: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// TTL cache in front of the read paths.
pub struct ResponseCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    default_ttl: ChronoDuration,
    ttl_overrides: HashMap<String, ChronoDuration>,
    sweep_interval: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let ttl_overrides = config
            .ttl_overrides
            .iter()
            .map(|(category, seconds)| {
                (
                    category.clone(),
                    ChronoDuration::seconds(i64::try_from(*seconds).unwrap_or(i64::MAX)),
                )
            })
            .collect();

        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: config.capacity.max(1),
            default_ttl: ChronoDuration::seconds(
                i64::try_from(config.default_ttl_seconds).unwrap_or(i64::MAX),
            ),
            ttl_overrides,
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds.max(1)),
        }
    }

    fn ttl(&self, category: &str) -> ChronoDuration {
        self.ttl_overrides
            .get(category)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    fn entry_key(category: &str, params: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for param in params {
            hasher.update(param.as_bytes());
            // Separator prevents ["ab"] and ["a","b"] from colliding.
            hasher.update([0x1f]);
        }
        format!("{category}:{:x}", hasher.finalize())
    }

    /// Returns the cached payload for `(category, params)`, or `None` on a
    /// miss or an expired entry.
    pub async fn get(&self, category: &str, params: &[&str]) -> Option<Value> {
        let key = Self::entry_key(category, params);
        let mut guard = self.inner.lock().await;

        match guard.get(&key) {
            Some(entry) if entry.expires_at > Utc::now() => {
                counter!("relay_cache_hits_total", "category" => category.to_string())
                    .increment(1);
                Some(entry.payload.clone())
            }
            Some(_) => {
                // Expired but not yet swept.
                guard.remove(&key);
                counter!("relay_cache_misses_total", "category" => category.to_string())
                    .increment(1);
                None
            }
            None => {
                counter!("relay_cache_misses_total", "category" => category.to_string())
                    .increment(1);
                None
            }
        }
    }

    /// Stores `payload` under `(category, params)` with the category's TTL,
    /// evicting the oldest ~10% of entries if the capacity cap is exceeded.
    pub async fn set(&self, category: &str, payload: Value, params: &[&str]) {
        let key = Self::entry_key(category, params);
        let now = Utc::now();
        let entry = CacheEntry {
            payload,
            category: category.to_string(),
            created_at: now,
            expires_at: now + self.ttl(category),
        };

        let mut guard = self.inner.lock().await;
        guard.insert(key, entry);

        if guard.len() > self.capacity {
            Self::evict_oldest(&mut guard);
        }
        gauge!("relay_cache_entries").set(guard.len() as f64);
    }

    /// Removes one entry (params given) or every entry of the category
    /// (params `None`). Other categories are untouched.
    pub async fn invalidate(&self, category: &str, params: Option<&[&str]>) {
        let mut guard = self.inner.lock().await;
        match params {
            Some(params) => {
                guard.remove(&Self::entry_key(category, params));
            }
            None => {
                guard.retain(|_, entry| entry.category != category);
            }
        }
        counter!("relay_cache_invalidations_total", "category" => category.to_string())
            .increment(1);
    }

    /// Spawns the background sweep removing expired entries on a fixed
    /// interval, independent of foreground gets and sets.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                cache.sweep_expired().await;
            }
        })
    }

    /// Removes every expired entry. The lock is held only for the retain
    /// pass, never across an await.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        let removed = before - guard.len();
        drop(guard);

        if removed > 0 {
            debug!(removed, "swept expired cache entries");
            counter!("relay_cache_swept_total").increment(removed as u64);
        }
    }

    /// Current entry count.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
        let purge_count = (entries.len() / 10).max(1);

        let mut by_age: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        for (key, _) in by_age.into_iter().take(purge_count) {
            entries.remove(&key);
        }
        counter!("relay_cache_evictions_total").increment(purge_count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(capacity: usize, default_ttl_seconds: u64) -> ResponseCache {
        let mut config = CacheConfig::default();
        config.capacity = capacity;
        config.default_ttl_seconds = default_ttl_seconds;
        ResponseCache::new(&config)
    }

    #[tokio::test]
    async fn set_then_get_returns_payload() {
        let cache = cache_with(100, 60);
        cache.set("events", json!(["a"]), &["1000"]).await;

        assert_eq!(cache.get("events", &["1000"]).await, Some(json!(["a"])));
        assert_eq!(cache.get("events", &["2000"]).await, None);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let mut config = CacheConfig::default();
        config.default_ttl_seconds = 0;
        let cache = ResponseCache::new(&config);

        cache.set("events", json!(1), &["1000"]).await;
        assert_eq!(cache.get("events", &["1000"]).await, None);
    }

    #[tokio::test]
    async fn category_invalidation_leaves_other_categories() {
        let cache = cache_with(100, 60);
        cache.set("events", json!(1), &["a"]).await;
        cache.set("events", json!(2), &["b"]).await;
        cache.set("identity", json!(3), &["a"]).await;

        cache.invalidate("events", None).await;

        assert_eq!(cache.get("events", &["a"]).await, None);
        assert_eq!(cache.get("events", &["b"]).await, None);
        assert_eq!(cache.get("identity", &["a"]).await, Some(json!(3)));
    }

    #[tokio::test]
    async fn single_entry_invalidation() {
        let cache = cache_with(100, 60);
        cache.set("events", json!(1), &["a"]).await;
        cache.set("events", json!(2), &["b"]).await;

        cache.invalidate("events", Some(&["a"])).await;

        assert_eq!(cache.get("events", &["a"]).await, None);
        assert_eq!(cache.get("events", &["b"]).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn capacity_pressure_evicts_oldest_tenth() {
        let cache = cache_with(10, 60);
        for i in 0..11 {
            cache.set("events", json!(i), &[&i.to_string()]).await;
            // Distinct creation instants keep the age ordering stable.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(cache.len().await <= 10);
        // The oldest entry went first.
        assert_eq!(cache.get("events", &["0"]).await, None);
        assert_eq!(cache.get("events", &["10"]).await, Some(json!(10)));
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let mut config = CacheConfig::default();
        config.default_ttl_seconds = 0;
        config.ttl_overrides.insert("durable".to_string(), 3600);
        let cache = ResponseCache::new(&config);

        cache.set("events", json!(1), &["a"]).await;
        cache.set("durable", json!(2), &["a"]).await;
        cache.sweep_expired().await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("durable", &["a"]).await, Some(json!(2)));
    }

    #[test]
    fn params_do_not_collide_across_boundaries() {
        let joined = ResponseCache::entry_key("c", &["ab"]);
        let split = ResponseCache::entry_key("c", &["a", "b"]);
        assert_ne!(joined, split);
    }
}
