//! Error types and handling for the tile server.
//!
//! The taxonomy follows the request lifecycle: argument validation errors are
//! rejected before any I/O, missing resources surface without state change,
//! and only storage writes and upstream generation failures are hard errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tile server.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (out-of-range timeline position, bad coordinates,
    /// invalid map id). Rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown map or timeline node. No state change.
    #[error("not found: {0}")]
    NotFound(String),

    /// A structural invariant would be violated (e.g. deleting the last
    /// timeline node).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Storage layer errors. Read failures are generally absorbed as "no
    /// record"; only write failures propagate here.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Tile generation errors from the upstream image model.
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Disk I/O operation failed.
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding of a persisted record failed.
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Generation backend errors.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The upstream image service request failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The upstream response carried no usable image.
    #[error("upstream returned no image: {0}")]
    EmptyResponse(String),

    /// The returned image payload could not be decoded.
    #[error("invalid image payload: {0}")]
    InvalidImage(String),

    /// Local image encoding/decoding failed.
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

impl Error {
    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a precondition-failed error.
    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::NotFound(_) | Error::PreconditionFailed(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PreconditionFailed(_) => StatusCode::CONFLICT,
            Error::Generation(GenerationError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::invalid_argument("x").is_client_error());
        assert!(Error::not_found("x").is_client_error());
        assert!(Error::precondition_failed("x").is_client_error());
        assert!(!Error::config("x").is_client_error());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::invalid_argument("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::precondition_failed("x").status_code(),
            StatusCode::CONFLICT
        );
    }
}
