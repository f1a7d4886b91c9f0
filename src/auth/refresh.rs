//! Refresh token persistence and rotation.
//!
//! Key layout:
//! - `refresh_token:{hash}` - JSON record, TTL = remaining lifetime
//! - `refresh_token:revoked:{hash}` - revocation marker, TTL >= the record's
//! - `user_tokens:{owner}` - set of the owner's token hashes
//!
//! Hashes leave the owner set when their token is rotated or revoked, or
//! when `revoke_all` finds the record already gone.
//!
//! A marker always wins over the record, so a replayed token is answered
//! with `TokenRevoked` for as long as the token itself could have lived.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use super::errors::{AuthError, AuthResult};
use super::models::{RefreshToken, UserId};
use super::secret::{generate_secret, hash_secret};
use crate::clock::SharedClock;
use crate::logging::log_security_event;
use crate::metrics;
use crate::store::{RevokeOutcome, SharedStore, StoreError, WriteOp};

/// Marker TTL when the target's residual TTL cannot be read
pub const FALLBACK_MARKER_TTL: StdDuration = StdDuration::from_secs(7 * 24 * 60 * 60);

fn token_key(hash: &str) -> String {
    format!("refresh_token:{hash}")
}

fn revoked_key(hash: &str) -> String {
    format!("refresh_token:revoked:{hash}")
}

fn owner_key(owner: UserId) -> String {
    format!("user_tokens:{owner}")
}

/// Stored form of a refresh token; the hash is the key
#[derive(Debug, Serialize, Deserialize)]
struct StoredRefreshToken {
    owner_id: UserId,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl StoredRefreshToken {
    fn parse(key: &str, raw: &str) -> AuthResult<Self> {
        serde_json::from_str(raw).map_err(|e| {
            AuthError::StoreUnavailable(StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn into_token(self, token_hash: String, revoked_at: Option<DateTime<Utc>>) -> RefreshToken {
        RefreshToken {
            token_hash,
            owner_id: self.owner_id,
            expires_at: self.expires_at,
            created_at: self.created_at,
            revoked_at,
        }
    }
}

/// Refresh token store over the shared key-value store
#[derive(Clone)]
pub struct RefreshTokenStore {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
}

impl RefreshTokenStore {
    /// # Arguments
    ///
    /// * `store` - Shared key-value store
    /// * `clock` - Time source
    /// * `ttl` - Lifetime of tokens minted by [`issue`](Self::issue) and [`rotate`](Self::rotate)
    pub fn new(store: SharedStore, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a secret for `owner`, persist it, and return the plaintext
    pub async fn issue(&self, owner: UserId) -> AuthResult<String> {
        let secret = generate_secret();
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Internal("refresh token lifetime overflows".to_string()))?;
        self.store(owner, &secret, expires_at).await?;
        Ok(secret)
    }

    /// Persist `hash(secret)` for `owner` until `expires_at`
    ///
    /// The record, the owner-index entry and the index TTL are written in
    /// one atomic batch. The index TTL is only ever extended.
    ///
    /// # Errors
    ///
    /// * `AuthError::Internal` - `expires_at` is not in the future
    /// * `AuthError::StoreUnavailable` - Store failure
    pub async fn store(
        &self,
        owner: UserId,
        secret: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        let now = self.clock.now();
        let ttl = (expires_at - now)
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or_else(|| {
                AuthError::Internal("refresh token expiration is in the past".to_string())
            })?;

        let hash = hash_secret(secret);
        let record = StoredRefreshToken {
            owner_id: owner,
            expires_at,
            created_at: now,
        };
        let value = serde_json::to_string(&record)
            .map_err(|e| AuthError::Internal(format!("refresh token encoding failed: {e}")))?;

        let index = owner_key(owner);
        let index_ttl = match self.store.ttl(&index).await? {
            Some(existing) if existing > ttl => existing,
            _ => ttl,
        };

        self.store
            .execute(vec![
                WriteOp::SetEx {
                    key: token_key(&hash),
                    value,
                    ttl,
                },
                WriteOp::SetAdd {
                    key: index.clone(),
                    member: hash,
                },
                WriteOp::Expire {
                    key: index,
                    ttl: index_ttl,
                },
            ])
            .await?;

        debug!(user_id = %owner, "Refresh token stored");
        Ok(())
    }

    /// Look up a presented secret
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenRevoked` - A revocation marker exists
    /// * `AuthError::TokenNotFound` - Neither marker nor record exists
    /// * `AuthError::TokenExpired` - Record exists but `now >= expires_at`
    pub async fn lookup(&self, secret: &str) -> AuthResult<RefreshToken> {
        let hash = hash_secret(secret);
        if self.store.exists(&revoked_key(&hash)).await? {
            return Err(AuthError::TokenRevoked);
        }

        let key = token_key(&hash);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(AuthError::TokenNotFound)?;
        let record = StoredRefreshToken::parse(&key, &raw)?;
        if self.clock.now() >= record.expires_at {
            return Err(AuthError::TokenExpired);
        }
        Ok(record.into_token(hash, None))
    }

    /// Exchange a valid secret for a fresh one bound to the same owner
    ///
    /// The presented secret is revoked in the same atomic step that checks
    /// it, before the replacement exists. Of any number of concurrent
    /// rotations of one secret, exactly one gets past that step; the others
    /// see `TokenRevoked`.
    ///
    /// # Returns
    ///
    /// * `AuthResult<(RefreshToken, String)>` - The revoked token and the new plaintext secret
    pub async fn rotate(&self, secret: &str) -> AuthResult<(RefreshToken, String)> {
        let hash = hash_secret(secret);
        let key = token_key(&hash);

        let outcome = self
            .store
            .revoke_once(&key, &revoked_key(&hash), FALLBACK_MARKER_TTL)
            .await?;

        let raw = match outcome {
            RevokeOutcome::Revoked(raw) => raw,
            RevokeOutcome::AlreadyRevoked => {
                metrics::refresh_reuse_total();
                log_security_event(
                    "refresh_token_reuse",
                    None,
                    None,
                    "Revoked refresh token presented for rotation",
                );
                return Err(AuthError::TokenRevoked);
            }
            RevokeOutcome::Missing => return Err(AuthError::TokenNotFound),
        };

        let now = self.clock.now();
        let record = StoredRefreshToken::parse(&key, &raw)?;
        if now >= record.expires_at {
            return Err(AuthError::TokenExpired);
        }

        let owner = record.owner_id;
        let new_secret = self.issue(owner).await?;
        self.forget(owner, &hash).await;
        info!(user_id = %owner, "Refresh token rotated");
        Ok((record.into_token(hash, Some(now)), new_secret))
    }

    /// Revoke one secret
    ///
    /// # Returns
    ///
    /// * `AuthResult<bool>` - Whether a live record was revoked by this call
    pub async fn revoke(&self, secret: &str) -> AuthResult<bool> {
        let hash = hash_secret(secret);
        let outcome = self
            .store
            .revoke_once(&token_key(&hash), &revoked_key(&hash), FALLBACK_MARKER_TTL)
            .await?;
        let RevokeOutcome::Revoked(raw) = outcome else {
            return Ok(false);
        };
        match StoredRefreshToken::parse(&token_key(&hash), &raw) {
            Ok(record) => self.forget(record.owner_id, &hash).await,
            Err(e) => warn!(error = %e, "Revoked refresh token has an unreadable record"),
        }
        Ok(true)
    }

    /// Drop a revoked hash from its owner's index
    ///
    /// The marker already answers for the hash, so a failure here only
    /// leaves a stale member for `revoke_all` to clean up.
    async fn forget(&self, owner: UserId, hash: &str) {
        let op = WriteOp::SetRemove {
            key: owner_key(owner),
            member: hash.to_string(),
        };
        if let Err(e) = self.store.execute(vec![op]).await {
            warn!(user_id = %owner, error = %e, "Failed to prune refresh token index");
        }
    }

    /// Revoke every token in the owner's index
    ///
    /// Each marker gets its target's residual TTL, or
    /// [`FALLBACK_MARKER_TTL`] when that cannot be read. Hashes whose record
    /// has already expired get no marker and are removed from the index.
    /// All writes go out in one batch.
    ///
    /// # Returns
    ///
    /// * `AuthResult<usize>` - Number of markers written
    pub async fn revoke_all(&self, owner: UserId) -> AuthResult<usize> {
        let index = owner_key(owner);
        let hashes = self.store.set_members(&index).await?;
        if hashes.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(hashes.len());
        let mut count = 0;
        for hash in hashes {
            let ttl = match self.store.ttl(&token_key(&hash)).await {
                Ok(Some(ttl)) => ttl,
                Ok(None) => {
                    ops.push(WriteOp::SetRemove {
                        key: index.clone(),
                        member: hash,
                    });
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %owner, error = %e, "Could not read refresh token TTL");
                    FALLBACK_MARKER_TTL
                }
            };
            ops.push(WriteOp::SetEx {
                key: revoked_key(&hash),
                value: "1".to_string(),
                ttl,
            });
            count += 1;
        }

        self.store.execute(ops).await?;
        log_security_event(
            "refresh_tokens_revoked",
            Some(owner),
            None,
            &format!("Revoked {count} refresh tokens"),
        );
        Ok(count)
    }
}
