//! Error types for ramp-state

use thiserror::Error;

/// Errors raised by an [`ArtifactStore`](crate::ArtifactStore).
///
/// A read that fails for any reason is a cache miss for the caller: the fold
/// executor retrains instead of failing the fold.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Nothing stored under this key
    #[error("artifact not found: {key}")]
    NotFound { key: String },

    /// Stored bytes do not match their recorded checksum (partial write)
    #[error("artifact corrupt: {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Invalid fold identity string
    #[error("invalid fold identity: {0}")]
    InvalidIdentity(String),

    /// Payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Background blocking task did not complete
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    /// Whether this error means "no usable artifact", as opposed to an
    /// infrastructure failure.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. } | StorageError::Corrupt { .. }
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
