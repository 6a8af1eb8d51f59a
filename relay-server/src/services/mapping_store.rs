//! Identity mapping store.
//!
//! Each platform exposes several incompatible identifiers for the same
//! account: the OAuth account id issued at connect time, the sender id its
//! webhooks carry, and the human username. This store is the durable, cached
//! association between the three. Mappings are created on the first
//! successful identity probe, refreshed on every subsequent probe, and never
//! deleted.

use chrono::Utc;
use metrics::counter;
use serde_json::json;
use shared::{IdentityMapping, Platform, RelayError, UsernameAssociation};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::store::{ObjectStore, keys};

use super::identity_probe::IdentityProbe;

/// Durable, cached identity mapping store.
pub struct MappingStore {
    store: Arc<dyn ObjectStore>,
    probe: Arc<dyn IdentityProbe>,
    /// account-or-oauth id → oauth user id, per platform.
    oauth_cache: RwLock<HashMap<(Platform, String), String>>,
    /// oauth user id → probe credential, per platform.
    credential_cache: RwLock<HashMap<(Platform, String), String>>,
    /// username → sender ids in append order, per platform.
    username_cache: RwLock<HashMap<(Platform, String), Vec<String>>>,
    /// Serializes the read-modify-append on a username's sender-id list.
    append_locks: Mutex<HashMap<(Platform, String), Arc<Mutex<()>>>>,
}

impl MappingStore {
    pub fn new(store: Arc<dyn ObjectStore>, probe: Arc<dyn IdentityProbe>) -> Self {
        Self {
            store,
            probe,
            oauth_cache: RwLock::new(HashMap::new()),
            credential_cache: RwLock::new(HashMap::new()),
            username_cache: RwLock::new(HashMap::new()),
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Probes the platform with `credential` and persists the OAuth mapping.
    ///
    /// Probe success is not undone on persistence failure; the next call
    /// simply refreshes the record.
    ///
    /// # Errors
    /// [`RelayError::ExternalApi`] if the probe fails, [`RelayError::Storage`]
    /// if the durable write fails.
    pub async fn save_oauth_mapping(
        &self,
        platform: Platform,
        oauth_user_id: &str,
        credential: &str,
    ) -> Result<IdentityMapping, RelayError> {
        let identity = self.probe.lookup_self(platform, credential).await?;

        let key = keys::oauth_mapping(platform, oauth_user_id);
        let created_at = match self.store.get(&key).await? {
            Some(existing) => serde_json::from_value::<IdentityMapping>(existing)
                .map(|mapping| mapping.created_at)
                .unwrap_or_else(|_| Utc::now()),
            None => Utc::now(),
        };

        let mapping = IdentityMapping {
            platform,
            oauth_user_id: oauth_user_id.to_string(),
            account_id: identity.account_id.clone(),
            username: identity.username.clone(),
            credential: credential.to_string(),
            created_at,
            updated_at: Utc::now(),
        };

        self.store.put(&key, &serde_json::to_value(&mapping)?).await?;
        self.remember_mapping(&mapping).await;

        counter!("relay_oauth_mappings_saved_total", "platform" => platform.as_str())
            .increment(1);
        info!(%platform, oauth_user_id, username = %mapping.username, "saved OAuth mapping");
        Ok(mapping)
    }

    /// Probes the platform for `webhook_sender_id`'s username and appends the
    /// sender id to that username's association list if absent.
    ///
    /// Idempotent per sender id. The read-modify-append is serialized per
    /// (platform, username) so concurrent writers lose no ids; the
    /// last-appended id wins username lookups.
    ///
    /// # Errors
    /// [`RelayError::ExternalApi`] if the probe fails, [`RelayError::Storage`]
    /// if the durable write fails.
    pub async fn save_webhook_mapping(
        &self,
        platform: Platform,
        webhook_sender_id: &str,
        credential: &str,
    ) -> Result<UsernameAssociation, RelayError> {
        let identity = self
            .probe
            .lookup_sender(platform, webhook_sender_id, credential)
            .await?;

        let lock = self.append_lock(platform, &identity.username).await;
        let _guard = lock.lock().await;

        let key = keys::username_association(platform, &identity.username);
        let mut association = match self.store.get(&key).await? {
            Some(body) => serde_json::from_value::<UsernameAssociation>(body)?,
            None => {
                debug!(%platform, username = %identity.username, "new username association");
                let now = Utc::now();
                UsernameAssociation {
                    platform,
                    username: identity.username.clone(),
                    webhook_sender_ids: Vec::new(),
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        if association.append_sender_id(webhook_sender_id) {
            self.store
                .put(&key, &serde_json::to_value(&association)?)
                .await?;
            counter!("relay_webhook_mappings_saved_total", "platform" => platform.as_str())
                .increment(1);
        }

        self.username_cache.write().await.insert(
            (platform, identity.username.clone()),
            association.webhook_sender_ids.clone(),
        );

        Ok(association)
    }

    /// Resolves a webhook recipient id to the stored OAuth user id, falling
    /// back to the recipient id unchanged when no mapping exists.
    ///
    /// The fallback is the self-healing default: an inbound event is never
    /// dropped for lack of a mapping. A cache miss scans the durable store
    /// and backfills the cache before giving up.
    pub async fn resolve_oauth_id(&self, platform: Platform, webhook_recipient_id: &str) -> String {
        let cache_key = (platform, webhook_recipient_id.to_string());
        if let Some(found) = self.oauth_cache.read().await.get(&cache_key) {
            return found.clone();
        }

        if let Err(err) = self.backfill_oauth_cache(platform).await {
            warn!(%platform, error = %err, "oauth cache backfill failed; using fallback identity");
        }

        match self.oauth_cache.read().await.get(&cache_key) {
            Some(found) => found.clone(),
            None => {
                counter!("relay_identity_fallbacks_total", "platform" => platform.as_str())
                    .increment(1);
                webhook_recipient_id.to_string()
            }
        }
    }

    /// Returns the last-appended sender id for `username`, or `None` if the
    /// username was never observed.
    pub async fn resolve_webhook_id_by_username(
        &self,
        platform: Platform,
        username: &str,
    ) -> Option<String> {
        let cache_key = (platform, username.to_string());
        if let Some(ids) = self.username_cache.read().await.get(&cache_key) {
            return ids.last().cloned();
        }

        let key = keys::username_association(platform, username);
        let association = match self.store.get(&key).await {
            Ok(Some(body)) => serde_json::from_value::<UsernameAssociation>(body).ok()?,
            Ok(None) => return None,
            Err(err) => {
                warn!(%platform, username, error = %err, "username lookup read failed");
                return None;
            }
        };

        self.username_cache
            .write()
            .await
            .insert(cache_key, association.webhook_sender_ids.clone());
        association.latest_sender_id().map(str::to_string)
    }

    /// Probe credential stored for an OAuth user, if any.
    pub async fn credential_for(&self, platform: Platform, oauth_user_id: &str) -> Option<String> {
        let cache_key = (platform, oauth_user_id.to_string());
        if let Some(found) = self.credential_cache.read().await.get(&cache_key) {
            return Some(found.clone());
        }

        let key = keys::oauth_mapping(platform, oauth_user_id);
        let mapping = match self.store.get(&key).await {
            Ok(Some(body)) => serde_json::from_value::<IdentityMapping>(body).ok()?,
            _ => return None,
        };

        self.remember_mapping(&mapping).await;
        Some(mapping.credential)
    }

    /// Profile fields for a platform's linked username, in the platform's
    /// historical field names. Consumed by the dashboard collaborator.
    pub fn profile_fields(
        &self,
        platform: Platform,
        mapping: &IdentityMapping,
    ) -> serde_json::Value {
        let mut fields = platform.profile_fields(&mapping.username);
        if let Some(object) = fields.as_object_mut() {
            object.insert("oauthUserId".into(), json!(mapping.oauth_user_id));
        }
        fields
    }

    async fn remember_mapping(&self, mapping: &IdentityMapping) {
        let mut oauth = self.oauth_cache.write().await;
        oauth.insert(
            (mapping.platform, mapping.oauth_user_id.clone()),
            mapping.oauth_user_id.clone(),
        );
        oauth.insert(
            (mapping.platform, mapping.account_id.clone()),
            mapping.oauth_user_id.clone(),
        );
        drop(oauth);

        self.credential_cache.write().await.insert(
            (mapping.platform, mapping.oauth_user_id.clone()),
            mapping.credential.clone(),
        );
    }

    async fn backfill_oauth_cache(&self, platform: Platform) -> Result<(), RelayError> {
        let listed = self
            .store
            .list(&keys::oauth_mapping_prefix(platform))
            .await?;

        for (key, body) in listed {
            match serde_json::from_value::<IdentityMapping>(body) {
                Ok(mapping) => self.remember_mapping(&mapping).await,
                Err(err) => warn!(key, error = %err, "skipping unreadable mapping record"),
            }
        }
        Ok(())
    }

    async fn append_lock(&self, platform: Platform, username: &str) -> Arc<Mutex<()>> {
        let mut guard = self.append_locks.lock().await;
        guard
            .entry((platform, username.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
