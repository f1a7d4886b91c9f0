//! Shared key-value store with per-key expiry.
//!
//! All cross-request state (refresh tokens, revocation markers, reset tokens,
//! rate-limit windows and cooldowns) lives behind [`KvStore`]. The trait only
//! exposes what the auth components need, and every method that must be atomic
//! is a single call so a backend can implement it as one round trip:
//!
//! - [`KvStore::execute`] applies a batch of writes all-or-nothing
//!   (`MULTI`/`EXEC` on Redis)
//! - [`KvStore::revoke_once`] is the check-and-revoke step of refresh-token
//!   rotation (a Lua script on Redis)
//! - [`KvStore::take`] reads and deletes a single-use value (`GETDEL`)
//! - [`KvStore::window_count`] prunes and counts a sliding window together
//! - [`KvStore::window_admit`] prunes, counts and conditionally records in
//!   one step (a Lua script on Redis)
//!
//! There is no in-process caching of anything read from the store.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokenward::clock::SystemClock;
//! use tokenward::store::{KvStore, MemoryStore, WriteOp};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new(Arc::new(SystemClock));
//! store
//!     .execute(vec![WriteOp::SetEx {
//!         key: "greeting".to_string(),
//!         value: "hello".to_string(),
//!         ttl: Duration::from_secs(60),
//!     }])
//!     .await?;
//! assert_eq!(store.get("greeting").await?, Some("hello".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod memory;
pub mod redis;
pub mod timeouts;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A single write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Set a string value with a TTL, replacing whatever was there
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// Add a member to a set
    SetAdd { key: String, member: String },
    /// Remove a member from a set
    SetRemove { key: String, member: String },
    /// Reset a key's TTL
    Expire { key: String, ttl: Duration },
    /// Insert a member into a time-ordered window, scored in epoch milliseconds
    WindowAdd {
        key: String,
        score_ms: i64,
        member: String,
    },
}

/// Result of the atomic check-and-revoke step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// The revocation marker already existed; nothing was changed
    AlreadyRevoked,
    /// Neither a marker nor the target record exists
    Missing,
    /// This caller placed the marker; carries the target's value
    Revoked(String),
}

/// Key-value store capability
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Whether a key exists (any type)
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remaining TTL of a key; `None` when missing or without expiry
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Members of a set (empty when missing)
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Apply every write or none of them
    async fn execute(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Atomically: if `marker` exists return [`RevokeOutcome::AlreadyRevoked`];
    /// if `target` is missing return [`RevokeOutcome::Missing`]; otherwise
    /// create `marker` with the target's residual TTL (or `fallback_ttl` when
    /// it cannot be read) and return the target's value.
    async fn revoke_once(
        &self,
        target: &str,
        marker: &str,
        fallback_ttl: Duration,
    ) -> StoreResult<RevokeOutcome>;

    /// Atomically read and delete a string value
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Drop window members scored below `since_ms`, then count what is left
    async fn window_count(&self, key: &str, since_ms: i64) -> StoreResult<u64>;

    /// Atomically: prune like [`KvStore::window_count`]; when fewer than `max`
    /// members remain, insert `member` at `score_ms` and reset the key's TTL
    /// to `ttl`. Returns the count seen before the insert, so the event was
    /// admitted iff the result is below `max`.
    async fn window_admit(
        &self,
        key: &str,
        since_ms: i64,
        max: u64,
        score_ms: i64,
        member: &str,
        ttl: Duration,
    ) -> StoreResult<u64>;
}

/// Shared store handle injected into every stateful component
pub type SharedStore = Arc<dyn KvStore>;

pub(crate) fn ensure_positive_ttl(key: &str, ttl: Duration) -> StoreResult<()> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl(key.to_string()));
    }
    Ok(())
}
