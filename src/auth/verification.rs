//! Email verification tokens.
//!
//! Unlike reset tokens these live on the user record, which keeps the hash
//! after verification. That is what lets a second use of the same link be
//! answered with `AlreadyVerified` instead of `TokenInvalid`.

use chrono::Duration;
use tracing::{info, warn};

use super::errors::{AuthError, AuthResult};
use super::models::UserId;
use super::secret::{generate_secret, hash_secret};
use crate::clock::SharedClock;
use crate::db::SharedUserStore;

/// A freshly minted verification secret and the hash to persist
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub secret: String,
    pub hash: String,
}

impl MintedToken {
    pub fn generate() -> Self {
        let secret = generate_secret();
        let hash = hash_secret(&secret);
        Self { secret, hash }
    }
}

/// Verification token lifecycle against the user store
#[derive(Clone)]
pub struct VerificationTokens {
    users: SharedUserStore,
    clock: SharedClock,
    ttl: Duration,
}

impl VerificationTokens {
    /// # Arguments
    ///
    /// * `users` - User store holding the token hashes
    /// * `clock` - Time source
    /// * `ttl` - Validity measured from the last (re)send
    pub fn new(users: SharedUserStore, clock: SharedClock, ttl: Duration) -> Self {
        Self { users, clock, ttl }
    }

    /// Replace the owner's verification token and restart its clock
    ///
    /// # Errors
    ///
    /// * `AuthError::UserStore` - Owner missing or already verified
    pub async fn issue(&self, owner: UserId) -> AuthResult<String> {
        let minted = MintedToken::generate();
        self.users
            .rotate_verification_token(owner, &minted.hash)
            .await?;
        Ok(minted.secret)
    }

    /// Verify the owner of `secret`
    ///
    /// # Errors
    ///
    /// * `AuthError::AlreadyVerified` - Token already verified its owner
    /// * `AuthError::TokenInvalid` - Token never existed or was superseded
    /// * `AuthError::TokenExpired` - More than the TTL since the last send, or
    ///   no send time on record
    pub async fn consume(&self, secret: &str) -> AuthResult<UserId> {
        let hash = hash_secret(secret);

        let Some(user) = self.users.by_verification_token(&hash).await? else {
            if self.users.was_token_already_consumed(&hash).await? {
                return Err(AuthError::AlreadyVerified);
            }
            return Err(AuthError::TokenInvalid);
        };

        let Some(sent_at) = user.verification_sent_at else {
            warn!(user_id = %user.id, "Verification token has no send time, treating as expired");
            return Err(AuthError::TokenExpired);
        };
        if self.clock.now() >= sent_at + self.ttl {
            return Err(AuthError::TokenExpired);
        }

        self.users.mark_verified(user.id).await?;
        info!(user_id = %user.id, "Email verified");
        Ok(user.id)
    }
}
