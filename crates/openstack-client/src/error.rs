//! OpenStack client errors

use thiserror::Error;

/// Errors that can occur when talking to the OpenStack Networking/Compute APIs
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request/response error (connect failure, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OpenStack API returned an unexpected status
    #[error("OpenStack API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists or is in use (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The floating IP is not bound to the VM it was asked to detach from
    #[error("Floating IP not attached: {0}")]
    NotAttached(String),

    /// Invalid request (e.g., malformed address)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    /// Maps an HTTP status and response body onto an error variant.
    pub(crate) fn from_status(status: reqwest::StatusCode, context: &str, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Authentication(format!("{context}: {status} - {body}")),
            404 => Self::NotFound(format!("{context}: {body}")),
            409 => Self::Conflict(format!("{context}: {body}")),
            400 => Self::InvalidRequest(format!("{context}: {body}")),
            _ => Self::Api(format!("{context} failed: {status} - {body}")),
        }
    }
}
