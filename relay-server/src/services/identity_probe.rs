//! Platform identity probes.
//!
//! A probe asks a platform's identity API who a credential or sender id
//! belongs to. The trait keeps the mapping store testable without network
//! access; production uses the HTTP implementation against each platform's
//! descriptor endpoint.

use async_trait::async_trait;
use serde_json::Value;
use shared::config::ProbeConfig;
use shared::{Platform, RelayError};
use std::time::Duration;
use tracing::debug;

/// Identity reported by a platform for an account or sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeIdentity {
    /// Platform-native account id.
    pub account_id: String,
    /// Human-readable username.
    pub username: String,
}

/// Opaque identity-lookup collaborator.
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    /// Resolves the identity behind `credential` (the "who am I" probe used
    /// when saving an OAuth mapping).
    async fn lookup_self(
        &self,
        platform: Platform,
        credential: &str,
    ) -> Result<ProbeIdentity, RelayError>;

    /// Resolves the identity of a webhook sender id using an account's
    /// credential.
    async fn lookup_sender(
        &self,
        platform: Platform,
        sender_id: &str,
        credential: &str,
    ) -> Result<ProbeIdentity, RelayError>;
}

/// HTTP probe against the platform identity APIs.
pub struct HttpIdentityProbe {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpIdentityProbe {
    /// Builds a probe with a redirect-disabled client.
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] if the HTTP client cannot be built.
    pub fn new(config: ProbeConfig) -> Result<Self, RelayError> {
        let client = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| RelayError::Config(format!("cannot build probe client: {err}")))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, platform: Platform) -> &str {
        self.config
            .endpoint_overrides
            .get(&platform)
            .map_or(platform.descriptor().identity_endpoint, String::as_str)
    }

    async fn fetch_identity(&self, url: String) -> Result<ProbeIdentity, RelayError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| RelayError::ExternalApi(format!("identity probe failed: {err}")))?;

        if !response.status().is_success() {
            return Err(RelayError::ExternalApi(format!(
                "identity probe returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| RelayError::ExternalApi(format!("identity probe body: {err}")))?;

        parse_identity(&body)
    }
}

fn parse_identity(body: &Value) -> Result<ProbeIdentity, RelayError> {
    let account_id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::ExternalApi("identity response missing 'id'".into()))?;
    let username = body
        .get("username")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::ExternalApi("identity response missing 'username'".into()))?;

    Ok(ProbeIdentity {
        account_id: account_id.to_string(),
        username: username.to_string(),
    })
}

#[async_trait]
impl IdentityProbe for HttpIdentityProbe {
    async fn lookup_self(
        &self,
        platform: Platform,
        credential: &str,
    ) -> Result<ProbeIdentity, RelayError> {
        let url = format!(
            "{}/me?fields=id,username&access_token={credential}",
            self.endpoint(platform)
        );
        debug!(%platform, "probing self identity");
        self.fetch_identity(url).await
    }

    async fn lookup_sender(
        &self,
        platform: Platform,
        sender_id: &str,
        credential: &str,
    ) -> Result<ProbeIdentity, RelayError> {
        let url = format!(
            "{}/{sender_id}?fields=id,username&access_token={credential}",
            self.endpoint(platform)
        );
        debug!(%platform, sender_id, "probing sender identity");
        self.fetch_identity(url).await
    }
}
