use axum::{http::StatusCode, response::IntoResponse};
use shared::RelayError;
use thiserror::Error;

use super::problem::ProblemDetails;

pub type AppResult<T> = Result<T, ApiError>;

/// API-facing error with an HTTP status and a stable machine code.
///
/// Read APIs distinguish "not found" from internal failure so the cache
/// layer never stores an error response; webhook ingestion maps recoverable
/// conditions to acknowledgments before an `ApiError` is ever constructed.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream_failure", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        ProblemDetails::new(self.status, self.code, self.message).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::NotFound(message) => Self::not_found(message),
            RelayError::MalformedPayload(message) => Self::bad_request(message),
            RelayError::ExternalApi(message) => Self::bad_gateway(message),
            RelayError::Storage(message)
            | RelayError::Connection(message)
            | RelayError::Config(message) => Self::internal_server_error(message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}
