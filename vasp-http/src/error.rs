//! Error types for the HTTP transport layer.

/// Errors that can occur while transporting protocol frames over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The request body did not carry a valid counterparty address pair.
    #[error("invalid address in path: {0}")]
    InvalidAddress(String),

    /// The underlying HTTP client reported a connection-level failure.
    #[error("transport error: {0}")]
    Connection(String),
}
