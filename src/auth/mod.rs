//! Authentication: credentials, tokens, and the flows built on them.
//!
//! This module implements:
//! - Argon2id password hashing with constant-time verification
//! - Encrypted, stateless access tokens (15-minute default expiry)
//! - Rotating refresh tokens with reuse detection (7-day default expiry)
//! - Single-use email verification and password reset tokens
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenward::auth::{AuthManager, LoginRequest, RegisterRequest};
//! use tokenward::clock::SystemClock;
//! use tokenward::config::AuthConfig;
//! use tokenward::db::{Database, PgUserStore};
//! use tokenward::email::build_notifier;
//! use tokenward::store::RedisStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::from_env()?;
//!     config.validate()?;
//!
//!     let db = Database::new(&config.database).await?;
//!     let store = RedisStore::connect(&config.redis_url, config.store_timeout).await?;
//!     let auth = AuthManager::new(
//!         &config,
//!         Arc::new(store),
//!         Arc::new(PgUserStore::new(db.pool().clone())),
//!         build_notifier(config.smtp.as_ref())?,
//!         Arc::new(SystemClock),
//!     )?;
//!
//!     let user = auth
//!         .register(RegisterRequest {
//!             email: "player@example.com".to_string(),
//!             password: "SecurePass123".to_string(),
//!         })
//!         .await?;
//!     println!("Registered user: {}", user.email);
//!
//!     let tokens = auth
//!         .login(LoginRequest {
//!             email: "player@example.com".to_string(),
//!             password: "SecurePass123".to_string(),
//!         })
//!         .await?;
//!     println!("Access token expires in {}s", tokens.expires_in);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod password;
pub mod refresh;
pub mod reset;
pub mod secret;
pub mod token;
pub mod validation;
pub mod verification;

pub use errors::{AuthError, AuthResult};
pub use manager::AuthManager;
pub use models::{
    AccessTokenClaims, AuthTokens, LoginRequest, PasswordResetConfirm, RefreshToken,
    RegisterRequest, User, UserId,
};
pub use password::{HashParams, PasswordHasher};
pub use refresh::RefreshTokenStore;
pub use reset::PasswordResetStore;
pub use token::{AccessTokenService, TokenError};
pub use validation::ValidationError;
pub use verification::VerificationTokens;
