//! Store call timeout helpers
//!
//! The per-call timeout is the only cancellation that reaches store I/O.

use super::errors::{StoreError, StoreResult};
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single store round trip (2 seconds)
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a redis future under `duration`
///
/// # Arguments
///
/// * `duration` - Timeout duration
/// * `future` - Redis command, pipeline or script invocation
///
/// # Returns
///
/// * `StoreResult<T>` - Command result, `StoreError::Timeout` or `StoreError::Unavailable`
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = Result<T, redis::RedisError>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(StoreError::from(e)),
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}
