//! Sliding-window rate limits and per-email cooldowns.
//!
//! Key layout:
//! - `ratelimit:{purpose}:{identity}` - time-ordered window of events
//! - `cooldown:{purpose}:{email}` - presence marker
//!
//! `purpose` namespaces counters, so login throttling never interacts with
//! registration throttling for the same IP.

use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use super::errors::{RateLimitError, RateLimiterResult};
use crate::auth::errors::{AuthError, AuthResult};
use crate::clock::SharedClock;
use crate::logging::log_security_event;
use crate::metrics;
use crate::store::{SharedStore, WriteOp};

/// At most `max_events` per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub max_events: u64,
    pub window: Duration,
}

impl WindowPolicy {
    pub fn new(max_events: u64, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// Per-IP default: 10 requests per 15 minutes
    pub fn per_ip() -> Self {
        Self::new(10, Duration::from_secs(15 * 60))
    }

    fn validate(&self) -> RateLimiterResult<()> {
        if self.max_events == 0 || self.window.is_zero() {
            return Err(RateLimitError::InvalidPolicy(format!("{self:?}")));
        }
        Ok(())
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::per_ip()
    }
}

/// One action per `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub duration: Duration,
}

impl CooldownPolicy {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Per-email default: 2 minutes
    pub fn per_email() -> Self {
        Self::new(Duration::from_secs(2 * 60))
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::per_email()
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Action is allowed
    Allowed { remaining: u64 },

    /// Action is blocked due to rate limit
    Locked { retry_after: u64 },
}

impl RateLimitResult {
    /// Check if action is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Check if the limit is exceeded
    pub fn is_exceeded(&self) -> bool {
        !self.is_allowed()
    }

    /// Get remaining attempts (if allowed)
    pub fn remaining(&self) -> Option<u64> {
        match self {
            RateLimitResult::Allowed { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Get retry after seconds (if locked)
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            RateLimitResult::Locked { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

fn window_key(purpose: &str, identity: &str) -> String {
    format!("ratelimit:{purpose}:{identity}")
}

fn cooldown_key(purpose: &str, identity: &str) -> String {
    format!("cooldown:{purpose}:{identity}")
}

/// Oldest score still inside the window; an event exactly `window` old is out
fn window_start(now_ms: i64, policy: &WindowPolicy) -> i64 {
    let window_ms = i64::try_from(policy.window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(window_ms).saturating_add(1)
}

fn event_member(now_ms: i64) -> String {
    format!("{now_ms}-{}", Uuid::new_v4().simple())
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Rate limiter over the shared key-value store
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Check a sliding window without recording anything
    ///
    /// Events at least `policy.window` old are discarded first; the check
    /// is exceeded when `max_events` or more remain.
    ///
    /// # Arguments
    ///
    /// * `purpose` - Counter namespace (e.g., "login", "register")
    /// * `identity` - IP address or email
    /// * `policy` - Limit to enforce
    pub async fn check_window(
        &self,
        purpose: &str,
        identity: &str,
        policy: &WindowPolicy,
    ) -> RateLimiterResult<RateLimitResult> {
        policy.validate()?;
        let since = window_start(self.now_ms(), policy);

        let count = self
            .store
            .window_count(&window_key(purpose, identity), since)
            .await?;

        if count >= policy.max_events {
            return Ok(RateLimitResult::Locked {
                retry_after: ceil_secs(policy.window),
            });
        }
        Ok(RateLimitResult::Allowed {
            remaining: policy.max_events - count,
        })
    }

    /// Check and record in one store step
    ///
    /// The event is recorded only when the window had room for it, so
    /// concurrent callers can never push the count past `max_events`.
    pub async fn admit_window(
        &self,
        purpose: &str,
        identity: &str,
        policy: &WindowPolicy,
    ) -> RateLimiterResult<RateLimitResult> {
        policy.validate()?;
        let now_ms = self.now_ms();
        let count = self
            .store
            .window_admit(
                &window_key(purpose, identity),
                window_start(now_ms, policy),
                policy.max_events,
                now_ms,
                &event_member(now_ms),
                policy.window,
            )
            .await?;

        if count >= policy.max_events {
            return Ok(RateLimitResult::Locked {
                retry_after: ceil_secs(policy.window),
            });
        }
        Ok(RateLimitResult::Allowed {
            remaining: policy.max_events - count - 1,
        })
    }

    /// Record one event and reset the window key's TTL to `policy.window`
    pub async fn record_window(
        &self,
        purpose: &str,
        identity: &str,
        policy: &WindowPolicy,
    ) -> RateLimiterResult<()> {
        policy.validate()?;
        let key = window_key(purpose, identity);
        let now_ms = self.now_ms();
        self.store
            .execute(vec![
                WriteOp::WindowAdd {
                    key: key.clone(),
                    score_ms: now_ms,
                    member: event_member(now_ms),
                },
                WriteOp::Expire {
                    key,
                    ttl: policy.window,
                },
            ])
            .await?;
        Ok(())
    }

    /// Whether a cooldown marker is present
    pub async fn check_cooldown(
        &self,
        purpose: &str,
        identity: &str,
    ) -> RateLimiterResult<RateLimitResult> {
        let key = cooldown_key(purpose, identity);
        if !self.store.exists(&key).await? {
            return Ok(RateLimitResult::Allowed { remaining: 1 });
        }
        let retry_after = self.store.ttl(&key).await?.map(ceil_secs).unwrap_or(1);
        Ok(RateLimitResult::Locked { retry_after })
    }

    /// Set the cooldown marker, always resetting it to the full duration
    pub async fn set_cooldown(
        &self,
        purpose: &str,
        identity: &str,
        policy: &CooldownPolicy,
    ) -> RateLimiterResult<()> {
        if policy.duration.is_zero() {
            return Err(RateLimitError::InvalidPolicy(format!("{policy:?}")));
        }
        self.store
            .execute(vec![WriteOp::SetEx {
                key: cooldown_key(purpose, identity),
                value: "1".to_string(),
                ttl: policy.duration,
            }])
            .await?;
        Ok(())
    }

    /// Clear a window
    pub async fn reset_window(&self, purpose: &str, identity: &str) -> RateLimiterResult<()> {
        self.store.delete(&window_key(purpose, identity)).await?;
        Ok(())
    }

    /// Gate an entry point on a sliding window
    ///
    /// Admission and recording happen in one store step. Store failures are
    /// logged and the request is let through.
    ///
    /// # Errors
    ///
    /// * `AuthError::RateLimited` - Window exceeded
    pub async fn guard_window(
        &self,
        purpose: &str,
        identity: &str,
        policy: &WindowPolicy,
    ) -> AuthResult<()> {
        match self.admit_window(purpose, identity, policy).await {
            Ok(RateLimitResult::Locked { retry_after }) => {
                metrics::rate_limited_total(purpose);
                log_security_event(
                    "rate_limited",
                    None,
                    Some(identity),
                    &format!("Rate limit exceeded for {purpose}"),
                );
                return Err(AuthError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            Ok(RateLimitResult::Allowed { remaining }) => {
                debug!(purpose, identity, remaining, "Rate limit check passed");
                Ok(())
            }
            Err(e) => {
                error!(purpose, identity, error = %e, "Rate limit check failed, allowing request");
                Ok(())
            }
        }
    }

    /// Gate an entry point on a per-identity cooldown
    ///
    /// Checks, then sets the marker when allowed. Store failures are logged
    /// and the request is let through.
    ///
    /// # Errors
    ///
    /// * `AuthError::RateLimited` - Cooldown active
    pub async fn guard_cooldown(
        &self,
        purpose: &str,
        identity: &str,
        policy: &CooldownPolicy,
    ) -> AuthResult<()> {
        match self.check_cooldown(purpose, identity).await {
            Ok(RateLimitResult::Locked { retry_after }) => {
                metrics::rate_limited_total(purpose);
                log_security_event(
                    "cooldown_active",
                    None,
                    Some(identity),
                    &format!("Cooldown active for {purpose}"),
                );
                return Err(AuthError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            Ok(RateLimitResult::Allowed { .. }) => {}
            Err(e) => {
                error!(purpose, identity, error = %e, "Cooldown check failed, allowing request");
                return Ok(());
            }
        }

        if let Err(e) = self.set_cooldown(purpose, identity, policy).await {
            error!(purpose, identity, error = %e, "Failed to set cooldown");
        }
        Ok(())
    }
}
