//! Input validation for credentials.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Maximum email length (RFC 5321 path limit)
pub const MAX_EMAIL_LEN: usize = 254;

/// Minimum password length in characters
pub const MIN_PASSWORD_LEN: usize = 8;

/// Upper bound on password length, keeps KDF input bounded
pub const MAX_PASSWORD_LEN: usize = 128;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid")
});

/// Malformed input, one variant per stable code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email is required")]
    EmailRequired,

    #[error("Email must be at most {MAX_EMAIL_LEN} characters")]
    EmailTooLong,

    #[error("Invalid email format")]
    EmailInvalid,

    #[error("Password is required")]
    PasswordRequired,

    #[error("Password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,

    #[error("Password must be at most {MAX_PASSWORD_LEN} characters")]
    PasswordTooLong,

    #[error("Token is required")]
    TokenRequired,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmailRequired => "EMAIL_REQUIRED",
            ValidationError::EmailTooLong => "EMAIL_TOO_LONG",
            ValidationError::EmailInvalid => "EMAIL_INVALID",
            ValidationError::PasswordRequired => "PASSWORD_REQUIRED",
            ValidationError::PasswordTooShort => "PASSWORD_TOO_SHORT",
            ValidationError::PasswordTooLong => "PASSWORD_TOO_LONG",
            ValidationError::TokenRequired => "TOKEN_REQUIRED",
        }
    }
}

/// Trim and lower-case an email address
///
/// Every lookup, cooldown key and insert goes through this so that
/// `" A@X.com"` and `"a@x.com"` are the same account.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an already-normalized email
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::EmailTooLong);
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err(ValidationError::EmailInvalid);
    }
    Ok(())
}

/// Validate a new password
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooLong);
    }
    Ok(())
}

/// Reject empty bearer secrets before any hashing or store access
pub fn require_token(token: &str) -> Result<&str, ValidationError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ValidationError::TokenRequired);
    }
    Ok(token)
}
