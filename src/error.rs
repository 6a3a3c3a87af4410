//! Error types for the cache-aside tier

use thiserror::Error;

use crate::chunk::ChunkKey;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache-aside tier
#[derive(Error, Debug)]
pub enum Error {
    /// Failure originating from the cache service or the backing table
    /// (connectivity, malformed response, capacity limits)
    #[error("storage error: {0}")]
    Storage(String),

    /// A cached record failed to decode. Corruption is fatal and is never
    /// treated as a cache miss.
    #[error("corrupt record for chunk {key}: {reason}")]
    CorruptRecord { key: ChunkKey, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a storage failure.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Shorthand for a corruption failure on the given chunk.
    pub fn corrupt(key: ChunkKey, reason: impl Into<String>) -> Self {
        Error::CorruptRecord {
            key,
            reason: reason.into(),
        }
    }
}
