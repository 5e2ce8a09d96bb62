//! Listing sources the stream service pulls from

pub mod connection_errors;
pub mod listing_source;

// Re-export main types
pub use connection_errors::{ConnectorError, ConnectorResult};
pub use listing_source::{ListOptions, ListingSource};
