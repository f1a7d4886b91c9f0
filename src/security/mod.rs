//! Abuse mitigation for auth entry points.
//!
//! Two policies over the shared store:
//! - **Sliding window**: at most N events per window per `(purpose, identity)`,
//!   identity being an IP or an email (default 10 per 15 minutes)
//! - **Cooldown**: one action per duration per `(purpose, email)` (default 2 minutes)
//!
//! The `guard_*` helpers fail open: a store outage is logged and the request
//! proceeds.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tokenward::clock::SystemClock;
//! use tokenward::security::{RateLimiter, WindowPolicy};
//! use tokenward::store::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(SystemClock);
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new(clock.clone())), clock);
//!
//! let policy = WindowPolicy::per_ip();
//! let result = limiter.check_window("login", "192.168.1.1", &policy).await?;
//! if result.is_allowed() {
//!     limiter.record_window("login", "192.168.1.1", &policy).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod rate_limiter;

pub use errors::{RateLimitError, RateLimiterResult};
pub use rate_limiter::{CooldownPolicy, RateLimitResult, RateLimiter, WindowPolicy};
