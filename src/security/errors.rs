//! Error types for security module

use thiserror::Error;

use crate::store::StoreError;

/// Result type for rate limiting operations
pub type RateLimiterResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Backing store failed
    #[error("Rate limit store error: {0}")]
    Store(#[from] StoreError),

    /// Policy cannot be enforced as configured
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),
}
