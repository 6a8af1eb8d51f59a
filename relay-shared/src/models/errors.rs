use thiserror::Error;

/// Error taxonomy shared by every relay component.
///
/// The variants deliberately separate recoverable ingestion conditions
/// (`ExternalApi`, `Storage`) from caller mistakes (`MalformedPayload`) and
/// expected absences (`NotFound`), because the webhook gateway acknowledges
/// the former while rejecting the latter.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A platform identity probe failed; processing continues with the best
    /// available identity.
    #[error("external API error: {0}")]
    ExternalApi(String),

    /// A durable read or write failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An inbound payload did not match the expected platform shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A mapping or event was absent; callers receive an explicit empty
    /// result, never a panic.
    #[error("not found: {0}")]
    NotFound(String),

    /// A streaming client disconnected abruptly; cleaned up silently.
    #[error("connection closed: {0}")]
    Connection(String),

    /// Startup configuration was invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether the gateway should still acknowledge the platform when this
    /// error occurs during ingestion.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::ExternalApi(_) | RelayError::Storage(_) | RelayError::Connection(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::MalformedPayload(err.to_string())
    }
}
