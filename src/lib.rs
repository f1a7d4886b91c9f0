//! # Tokenward
//!
//! Credential issuance, rotation and revocation for HTTP services.
//!
//! The crate owns the security-sensitive half of an authentication backend and
//! leaves routing and request parsing to the caller. All mutable shared state
//! lives in a key-value store with per-key expiry; nothing about token validity
//! is cached in process, so several instances can serve the same users.
//!
//! ## Credentials
//!
//! - **Password hash**: Argon2id, self-describing PHC string
//! - **Access token**: XChaCha20-Poly1305 envelope, stateless, short-lived
//! - **Refresh token**: random secret, stored hashed, rotated on every use
//! - **Verification / reset token**: random secret delivered by email, single use
//!
//! ## Core Modules
//!
//! - [`auth`]: Credential components and the [`AuthManager`] facade
//! - [`security`]: Sliding-window and cooldown rate limiting
//! - [`store`]: Key-value store abstraction with Redis and in-memory backends
//! - [`db`]: User records (Postgres via sqlx, or in-memory)
//! - [`email`]: Outbound verification and reset links
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tokenward::auth::HashParams;
//! use tokenward::clock::SystemClock;
//! use tokenward::config::{AuthConfig, TokenKey};
//! use tokenward::db::MemoryUserStore;
//! use tokenward::email::LogNotifier;
//! use tokenward::store::MemoryStore;
//! use tokenward::AuthManager;
//!
//! let mut config = AuthConfig::new(TokenKey::new([7; 32]));
//! config.hash_params = HashParams::insecure_fast();
//!
//! let clock = Arc::new(SystemClock);
//! let auth = AuthManager::new(
//!     &config,
//!     Arc::new(MemoryStore::new(clock.clone())),
//!     Arc::new(MemoryUserStore::new(clock.clone())),
//!     Arc::new(LogNotifier),
//!     clock,
//! )
//! .unwrap();
//! assert!(auth.authenticate("Bearer not-a-token").is_err());
//! ```

/// Authentication components and the manager facade.
pub mod auth;
pub use auth::{AuthError, AuthManager, AuthResult, AuthTokens};

pub mod clock;
pub mod config;

/// User record storage.
pub mod db;

pub mod email;
pub mod logging;
pub mod metrics;

/// Rate limiting.
pub mod security;

/// Shared key-value store.
pub mod store;
