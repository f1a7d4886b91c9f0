//! Key-value store error types.

use std::time::Duration;
use thiserror::Error;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or command rejected
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer within the per-call budget
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A key holds something other than what the caller expects
    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Writes must carry a positive TTL
    #[error("Invalid TTL for key {0}")]
    InvalidTtl(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
