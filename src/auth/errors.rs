//! Authentication error types.

use thiserror::Error;

use super::token::TokenError;
use super::validation::ValidationError;
use crate::db::UserStoreError;
use crate::store::StoreError;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Wrong password or unknown user, deliberately indistinguishable
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Login before the email address was verified
    #[error("Email address not verified")]
    EmailNotVerified,

    /// Token was authentic but past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Token was revoked (refresh reuse, logout, password reset)
    #[error("Token revoked")]
    TokenRevoked,

    /// Token failed authentication or is malformed
    #[error("Invalid token")]
    TokenInvalid,

    /// Token does not exist (never issued, consumed, or expired away)
    #[error("Token not found")]
    TokenNotFound,

    /// Verification token was already used
    #[error("Email already verified")]
    AlreadyVerified,

    /// Email already registered
    #[error("Email already exists")]
    DuplicateEmail,

    /// Rate limit or cooldown active
    #[error("Too many attempts, please try again later")]
    RateLimited { retry_after_secs: u64 },

    /// Shared key-value store failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// User store failure
    #[error("User store error: {0}")]
    UserStore(UserStoreError),

    /// Hashing, encryption or task failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for the boundary layer
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(e) => e.code(),
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::TokenNotFound => "TOKEN_NOT_FOUND",
            AuthError::AlreadyVerified => "ALREADY_VERIFIED",
            AuthError::DuplicateEmail => "EMAIL_EXISTS",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::StoreUnavailable(_) | AuthError::UserStore(_) | AuthError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Infrastructure errors are sanitized to prevent information disclosure
    /// about the internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::StoreUnavailable(_) | AuthError::UserStore(_) | AuthError::Internal(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether the failure is infrastructure rather than the caller's doing
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::StoreUnavailable(_) | AuthError::UserStore(_) | AuthError::Internal(_)
        )
    }
}

impl From<UserStoreError> for AuthError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::DuplicateEmail => AuthError::DuplicateEmail,
            other => AuthError::UserStore(other),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid => AuthError::TokenInvalid,
            TokenError::Encryption => AuthError::Internal(err.to_string()),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
