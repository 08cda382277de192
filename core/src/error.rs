//! Error types for the session API client.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers frequently distinguish
//! "the session does not exist" from "the server returned an unexpected
//! status." All other non-2xx responses land in `HttpError` with the raw
//! status code and body for debugging. Failures that happen before a status
//! is received (`Timeout`, `Transport`) are kept apart so the retry layer and
//! the queue fallback can treat them as transient.

use std::time::Duration;

use crate::http::TransportError;

/// Errors returned by `SessionClient` and `SessionApi`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 404.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The call did not finish within the configured timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// No response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A 2xx response whose envelope carried `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Input failed validation before any I/O was attempted.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

impl ApiError {
    /// Input problems are the caller's fault; retrying or queuing them only
    /// replays the same failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, ApiError::Validation(_) | ApiError::SerializationError(_))
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
