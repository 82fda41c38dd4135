//! Core error types

use thiserror::Error;

/// Boxed error used at the factory and release boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache capacity must be at least 1")]
    InvalidCapacity,

    #[error("Cache TTL must be greater than zero")]
    InvalidTtl,

    #[error("Cache has been disposed")]
    Disposed,

    #[error("Failed to create value for key {key}: {source}")]
    Factory {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to release {} of {removed} removed value(s)", failures.len())]
    Release {
        removed: usize,
        failures: Vec<ReleaseError>,
    },
}

/// A single failed release, tagged with the key of the removed entry
#[derive(Error, Debug)]
#[error("Failed to release value for key {key}: {source}")]
pub struct ReleaseError {
    pub key: String,
    #[source]
    pub source: BoxError,
}
