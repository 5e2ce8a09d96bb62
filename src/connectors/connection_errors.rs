//! Error types for listing sources

use std::time::Duration;

/// Failures a [`ListingSource`](super::ListingSource) can report
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The API asked us to slow down
    #[error("Rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    /// The API answered with an error status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IO(String),
    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,
    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::IO(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::SerializationError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ConnectorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ConnectorError::Timeout
    }
}

/// Result type for listing source operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;
