//! Password reset tokens.
//!
//! `password_reset:{hash}` maps to the owner's id with a fixed TTL that is
//! never extended. Consuming a token deletes it in the same store step that
//! reads it, so of two concurrent uses only one sees the owner.

use chrono::Duration;
use tracing::debug;
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::models::UserId;
use super::secret::{generate_secret, hash_secret};
use crate::store::{SharedStore, StoreError, WriteOp};

fn reset_key(hash: &str) -> String {
    format!("password_reset:{hash}")
}

/// Single-use reset tokens over the shared key-value store
#[derive(Clone)]
pub struct PasswordResetStore {
    store: SharedStore,
    ttl: Duration,
}

impl PasswordResetStore {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Mint a reset secret for `owner`
    ///
    /// # Returns
    ///
    /// * `AuthResult<String>` - Plaintext secret, for out-of-band delivery only
    pub async fn issue(&self, owner: UserId) -> AuthResult<String> {
        let secret = self.write(owner).await?;
        debug!(user_id = %owner, "Password reset token issued");
        Ok(secret)
    }

    /// Perform the same write as [`issue`](Self::issue) for nobody
    ///
    /// The record is bound to the nil id, which [`consume`](Self::consume)
    /// never accepts, and the secret is dropped. Requests for unknown emails
    /// go through this so both paths cost one store write.
    pub async fn issue_unbound(&self) -> AuthResult<()> {
        self.write(Uuid::nil()).await?;
        Ok(())
    }

    async fn write(&self, owner: UserId) -> AuthResult<String> {
        let ttl = self
            .ttl
            .to_std()
            .map_err(|_| AuthError::Internal("reset token TTL must be positive".to_string()))?;

        let secret = generate_secret();
        self.store
            .execute(vec![WriteOp::SetEx {
                key: reset_key(&hash_secret(&secret)),
                value: owner.to_string(),
                ttl,
            }])
            .await?;
        Ok(secret)
    }

    /// Resolve a secret to its owner without consuming it
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenNotFound` - Never issued, already consumed, or expired
    pub async fn lookup(&self, secret: &str) -> AuthResult<UserId> {
        let key = reset_key(&hash_secret(secret));
        let raw = self.store.get(&key).await?;
        parse_owner(key, raw)
    }

    /// Resolve a secret to its owner and delete it in one step
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenNotFound` - Never issued, already consumed, or expired
    pub async fn consume(&self, secret: &str) -> AuthResult<UserId> {
        let key = reset_key(&hash_secret(secret));
        let raw = self.store.take(&key).await?;
        parse_owner(key, raw)
    }
}

fn parse_owner(key: String, raw: Option<String>) -> AuthResult<UserId> {
    let raw = raw.ok_or(AuthError::TokenNotFound)?;
    let owner = raw.parse::<UserId>().map_err(|e| {
        AuthError::StoreUnavailable(StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })
    })?;
    if owner.is_nil() {
        return Err(AuthError::TokenNotFound);
    }
    Ok(owner)
}
