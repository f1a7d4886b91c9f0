//! Authentication manager implementation.

use chrono::Duration;
use tracing::{debug, info, warn};

use super::errors::{AuthError, AuthResult};
use super::models::{
    AccessTokenClaims, AuthTokens, LoginRequest, PasswordResetConfirm, RegisterRequest, User,
    UserId,
};
use super::password::PasswordHasher;
use super::refresh::RefreshTokenStore;
use super::reset::PasswordResetStore;
use super::token::{AccessTokenService, bearer_token};
use super::validation::{normalize_email, require_token, validate_email, validate_password};
use super::verification::{MintedToken, VerificationTokens};
use crate::clock::SharedClock;
use crate::config::AuthConfig;
use crate::db::SharedUserStore;
use crate::email::{EmailKind, SharedNotifier, dispatch_detached};
use crate::metrics;
use crate::security::{CooldownPolicy, RateLimiter, WindowPolicy};
use crate::store::SharedStore;

/// Token type reported alongside issued pairs
pub const TOKEN_TYPE: &str = "Bearer";

/// Authentication manager
///
/// Owns every credential component and exposes the operations the HTTP
/// layer calls. All collaborators are injected; nothing here is global.
#[derive(Clone)]
pub struct AuthManager {
    users: SharedUserStore,
    hasher: PasswordHasher,
    access_tokens: AccessTokenService,
    refresh_tokens: RefreshTokenStore,
    verification: VerificationTokens,
    resets: PasswordResetStore,
    limiter: RateLimiter,
    notifier: SharedNotifier,
    access_token_ttl: Duration,
    ip_limit: WindowPolicy,
    email_cooldown: CooldownPolicy,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `store` - Shared key-value store
    /// * `users` - User record store
    /// * `notifier` - Outbound email
    /// * `clock` - Time source
    ///
    /// # Errors
    ///
    /// * `AuthError::Internal` - Argon2 parameters rejected
    pub fn new(
        config: &AuthConfig,
        store: SharedStore,
        users: SharedUserStore,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> AuthResult<Self> {
        Ok(Self {
            hasher: PasswordHasher::new(config.hash_params)?,
            access_tokens: AccessTokenService::new(config.token_key.as_bytes(), clock.clone()),
            refresh_tokens: RefreshTokenStore::new(
                store.clone(),
                clock.clone(),
                config.refresh_token_ttl,
            ),
            verification: VerificationTokens::new(
                users.clone(),
                clock.clone(),
                config.verification_token_ttl,
            ),
            resets: PasswordResetStore::new(store.clone(), config.reset_token_ttl),
            limiter: RateLimiter::new(store, clock),
            users,
            notifier,
            access_token_ttl: config.access_token_ttl,
            ip_limit: config.ip_limit,
            email_cooldown: config.email_cooldown,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    /// Register a new user
    ///
    /// The verification email is dispatched on a detached task.
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Email or password malformed
    /// * `AuthError::DuplicateEmail` - Email already exists
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<User> {
        let email = normalize_email(&request.email);
        validate_email(&email)?;
        validate_password(&request.password)?;

        let password_hash = self.hash_password(request.password).await?;
        let token = MintedToken::generate();
        let user = self.users.create(&email, &password_hash, &token.hash).await?;

        info!(user_id = %user.id, email = %email, "User registered");
        dispatch_detached(
            self.notifier.clone(),
            EmailKind::Verification,
            email,
            token.secret,
        );
        Ok(user)
    }

    /// Exchange email and password for a token pair
    ///
    /// Unknown users are checked against a dummy hash so both failure paths
    /// run one full derivation.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - Unknown email or wrong password
    /// * `AuthError::EmailNotVerified` - Correct password, unverified email
    /// * `AuthError::StoreUnavailable` - Refresh token could not be persisted
    pub async fn login(&self, request: LoginRequest) -> AuthResult<AuthTokens> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            metrics::login_total("invalid_credentials");
            return Err(AuthError::InvalidCredentials);
        }

        let user = match self.users.by_email(&email).await {
            Ok(user) => user,
            Err(e) => {
                metrics::login_total("error");
                return Err(e.into());
            }
        };

        let Some(user) = user else {
            self.burn_dummy_verification(request.password).await;
            debug!(email = %email, "Login for unknown email");
            metrics::login_total("invalid_credentials");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .verify_password(user.password_hash.clone(), request.password)
            .await?
        {
            debug!(user_id = %user.id, "Login with wrong password");
            metrics::login_total("invalid_credentials");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.email_verified {
            metrics::login_total("unverified");
            return Err(AuthError::EmailNotVerified);
        }

        let tokens = match self.issue_tokens(user.id, &user.email).await {
            Ok(tokens) => tokens,
            Err(e) => {
                metrics::login_total("error");
                return Err(e);
            }
        };

        metrics::login_total("success");
        info!(user_id = %user.id, "User logged in");
        Ok(tokens)
    }

    /// Rotate a refresh token into a new token pair
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenRevoked` - Token already rotated or revoked
    /// * `AuthError::TokenNotFound` - Token never issued or expired away
    /// * `AuthError::TokenExpired` - Token past its expiry
    /// * `AuthError::StoreUnavailable` - Store failure; nothing is issued
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthTokens> {
        let secret = require_token(refresh_token)?;

        let result = self.rotate_and_issue(secret).await;
        metrics::refresh_total(match &result {
            Ok(_) => "success",
            Err(AuthError::TokenRevoked) => "revoked",
            Err(AuthError::TokenExpired) => "expired",
            Err(AuthError::TokenNotFound) => "not_found",
            Err(_) => "error",
        });
        result
    }

    async fn rotate_and_issue(&self, secret: &str) -> AuthResult<AuthTokens> {
        let (old, refresh_token) = self.refresh_tokens.rotate(secret).await?;

        let user = self
            .users
            .by_id(old.owner_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        let access_token =
            self.access_tokens
                .issue(user.id, &user.email, self.access_token_ttl)?;

        Ok(self.token_pair(access_token, refresh_token))
    }

    /// Revoke a refresh token
    ///
    /// Always succeeds; store failures are logged.
    pub async fn logout(&self, refresh_token: &str) {
        let Ok(secret) = require_token(refresh_token) else {
            return;
        };
        match self.refresh_tokens.revoke(secret).await {
            Ok(true) => info!("Refresh token revoked on logout"),
            Ok(false) => debug!("Logout with unknown or already revoked refresh token"),
            Err(e) => warn!(error = %e, "Failed to revoke refresh token on logout"),
        }
    }

    /// Start a password reset
    ///
    /// Returns the same success whether or not the email exists, and
    /// whether or not the email could be sent. Only a malformed address is
    /// rejected.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        validate_email(&email)?;

        let user = match self.users.by_email(&email).await {
            Ok(user) => user,
            Err(e) => {
                warn!(email = %email, error = %e, "Failed to look up user for password reset");
                None
            }
        };

        match user {
            Some(user) => match self.resets.issue(user.id).await {
                Ok(secret) => {
                    info!(user_id = %user.id, "Password reset requested");
                    dispatch_detached(
                        self.notifier.clone(),
                        EmailKind::PasswordReset,
                        email,
                        secret,
                    );
                }
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "Failed to issue password reset token")
                }
            },
            None => {
                debug!(email = %email, "Password reset requested for unknown email");
                if let Err(e) = self.resets.issue_unbound().await {
                    warn!(error = %e, "Failed to write unbound password reset token");
                }
            }
        }
        Ok(())
    }

    /// Complete a password reset
    ///
    /// The reset token is consumed before anything else happens, so of two
    /// concurrent uses only one gets past that step. If writing the new hash
    /// then fails the token is gone and the user has to request another.
    /// Every refresh token of the user is revoked afterwards; a failure there
    /// is logged and the password change stands.
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Token missing or new password malformed
    /// * `AuthError::TokenNotFound` - Token never issued, used, or expired
    pub async fn reset_password(&self, request: PasswordResetConfirm) -> AuthResult<()> {
        let secret = require_token(&request.token)?;
        validate_password(&request.new_password)?;

        let owner = self.resets.consume(secret).await?;
        let password_hash = match self.hash_password(request.new_password).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(user_id = %owner, error = %e, "Reset token consumed but hashing failed");
                return Err(e);
            }
        };
        if let Err(e) = self.users.update_password(owner, &password_hash).await {
            warn!(user_id = %owner, error = %e, "Reset token consumed but password update failed");
            return Err(e.into());
        }
        info!(user_id = %owner, "Password reset");

        if let Err(e) = self.refresh_tokens.revoke_all(owner).await {
            warn!(user_id = %owner, error = %e, "Failed to revoke refresh tokens after password reset");
        }
        Ok(())
    }

    /// Verify an email address
    ///
    /// # Errors
    ///
    /// * `AuthError::AlreadyVerified` - Token was already used
    /// * `AuthError::TokenInvalid` - Token never existed
    /// * `AuthError::TokenExpired` - Token older than its TTL
    pub async fn verify_email(&self, token: &str) -> AuthResult<()> {
        let secret = require_token(token)?;
        self.verification.consume(secret).await?;
        Ok(())
    }

    /// Send a fresh verification link
    ///
    /// Same success response for unknown, already verified and pending
    /// accounts; only a malformed address is rejected.
    pub async fn resend_verification(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        validate_email(&email)?;

        let user = match self.users.by_email(&email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(email = %email, "Verification resend for unknown email");
                return Ok(());
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Failed to look up user for verification resend");
                return Ok(());
            }
        };

        if user.email_verified {
            debug!(user_id = %user.id, "Verification resend for verified user");
            return Ok(());
        }

        match self.verification.issue(user.id).await {
            Ok(secret) => {
                dispatch_detached(self.notifier.clone(), EmailKind::Verification, email, secret);
            }
            Err(e) => warn!(user_id = %user.id, error = %e, "Failed to rotate verification token"),
        }
        Ok(())
    }

    /// Verify an access token
    pub fn verify_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        Ok(self.access_tokens.verify(token)?)
    }

    /// Verify the token in an `Authorization: Bearer ...` header value
    ///
    /// # Errors
    ///
    /// * `AuthError::TokenInvalid` - Header malformed or token not authentic
    /// * `AuthError::TokenExpired` - Token past its expiry
    pub fn authenticate(&self, authorization: &str) -> AuthResult<AccessTokenClaims> {
        let token = bearer_token(authorization)?;
        self.verify_access_token(token)
    }

    /// Per-IP sliding window for `purpose`; fails open
    pub async fn guard_ip(&self, purpose: &str, ip: &str) -> AuthResult<()> {
        self.limiter.guard_window(purpose, ip, &self.ip_limit).await
    }

    /// Per-email cooldown for `purpose`; fails open
    pub async fn guard_email_cooldown(&self, purpose: &str, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        self.limiter
            .guard_cooldown(purpose, &email, &self.email_cooldown)
            .await
    }

    async fn issue_tokens(&self, user_id: UserId, email: &str) -> AuthResult<AuthTokens> {
        let access_token = self
            .access_tokens
            .issue(user_id, email, self.access_token_ttl)?;
        let refresh_token = self.refresh_tokens.issue(user_id).await?;
        Ok(self.token_pair(access_token, refresh_token))
    }

    fn token_pair(&self, access_token: String, refresh_token: String) -> AuthTokens {
        AuthTokens {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.access_token_ttl.num_seconds(),
        }
    }

    async fn hash_password(&self, password: String) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
    }

    async fn verify_password(&self, encoded: String, password: String) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&encoded, &password))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))
    }

    async fn burn_dummy_verification(&self, password: String) {
        let hasher = self.hasher.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || hasher.verify_dummy(&password)).await {
            warn!(error = %e, "Dummy verification task failed");
        }
    }
}
