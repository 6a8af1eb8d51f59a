use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{env, fs, path::PathBuf};

use crate::models::errors::RelayError;
use crate::models::platform::Platform;

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Header propagated or assigned as the request id.
    pub request_id_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            request_id_header: "x-request-id".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Durable store settings. Without a URL the relay runs on the in-memory
/// store, which is suitable for development and tests only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL. `None` selects the in-memory store.
    pub url: Option<String>,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Webhook gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    /// Pre-shared secret the platform echoes during verification.
    pub verify_token: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_token: "change-me".to_string(),
        }
    }
}

/// Real-time delivery hub settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Seconds between heartbeat frames.
    pub heartbeat_seconds: u64,
    /// Bound of each connection's outbound queue; overflow drops the
    /// connection rather than blocking the publisher.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: 30,
            channel_capacity: 64,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entry count before the oldest ~10% are evicted.
    pub capacity: usize,
    /// Seconds between background sweeps of expired entries.
    pub sweep_interval_seconds: u64,
    /// TTL applied to categories without an override.
    pub default_ttl_seconds: u64,
    /// Per-category TTL overrides.
    pub ttl_overrides: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            sweep_interval_seconds: 60,
            default_ttl_seconds: 300,
            ttl_overrides: HashMap::new(),
        }
    }
}

/// Ingestion retry and dead-letter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Attempts before a write is dead-lettered.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Dead-letter ring capacity.
    pub dead_letter_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            dead_letter_capacity: 1_000,
        }
    }
}

/// Identity probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Endpoint overrides, keyed by platform. Used to point probes at a
    /// staging host or a local stub.
    pub endpoint_overrides: HashMap<Platform, String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            endpoint_overrides: HashMap::new(),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Durable store settings.
    pub database: DatabaseConfig,
    /// Webhook gateway settings.
    pub webhook: WebhookConfig,
    /// Delivery hub settings.
    pub stream: StreamConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Ingestion retry settings.
    pub ingest: IngestConfig,
    /// Identity probe settings.
    pub probe: ProbeConfig,
}

impl Config {
    /// Loads the configuration from an optional file, environment variables,
    /// and an optional port override, in that precedence order.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a YAML or JSON configuration file.
    /// * `port_override` - Optional port from the command line.
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] if the file cannot be read or parsed,
    /// an environment override is invalid, or validation fails.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, RelayError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self, RelayError> {
        let content = fs::read_to_string(path)
            .map_err(|err| RelayError::Config(format!("cannot read {}: {err}", path.display())))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yml::from_str(&content)
                .map_err(|err| RelayError::Config(format!("invalid YAML config: {err}"))),
            Some("json") => serde_json::from_str(&content)
                .map_err(|err| RelayError::Config(format!("invalid JSON config: {err}"))),
            _ => Err(RelayError::Config(
                "unsupported configuration format; use 'yaml' or 'json'".to_string(),
            )),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), RelayError> {
        if let Ok(port) = env::var("RELAY_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| {
                RelayError::Config("RELAY_SERVER_PORT must be a number between 1 and 65535".into())
            })?;
        }
        if let Ok(url) = env::var("RELAY_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(level) = env::var("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(token) = env::var("RELAY_VERIFY_TOKEN") {
            self.webhook.verify_token = token;
        }
        Ok(())
    }

    /// Validates the resolved configuration.
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.server.port == 0 {
            return Err(RelayError::Config(
                "server.port must be greater than 0".into(),
            ));
        }
        if self.webhook.verify_token.is_empty() {
            return Err(RelayError::Config(
                "webhook.verify_token must not be empty".into(),
            ));
        }
        if self.stream.channel_capacity == 0 {
            return Err(RelayError::Config(
                "stream.channel_capacity must be greater than 0".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(RelayError::Config(
                "cache.capacity must be greater than 0".into(),
            ));
        }
        if self.ingest.max_attempts == 0 {
            return Err(RelayError::Config(
                "ingest.max_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
