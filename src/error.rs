//! Error types and handling for reddit-stream
//!
//! Errors surface asynchronously on a stream's error channel. None of them
//! are retried inside a tick; the next tick is the retry.

use crate::connectors::ConnectorError;

/// Main error type for polling streams
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The surrounding operation was cancelled; fatal to the stream
    #[error("Operation cancelled")]
    Cancelled,
    /// The fetch function failed; the stream keeps polling
    #[error("Fetch failed: {0}")]
    Fetch(String),
    /// A typed failure reported by a listing source
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    /// The stream was started with an unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl StreamError {
    /// Wrap any displayable failure from a fetch function.
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        StreamError::Fetch(err.to_string())
    }

    /// Whether this error ends the stream on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::Cancelled | StreamError::InvalidConfiguration(_)
        )
    }
}

/// Result type for reddit-stream operations
pub type StreamResult<T> = Result<T, StreamError>;
