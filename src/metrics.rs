//! Auth outcome counters.
//!
//! Recorded through the `metrics` facade. The library installs no exporter;
//! without one every call is a no-op.

/// Login attempt outcome (`success`, `invalid_credentials`, `unverified`, `error`)
pub fn login_total(outcome: &'static str) {
    metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
}

/// Refresh attempt outcome (`success`, `revoked`, `expired`, `not_found`, `error`)
pub fn refresh_total(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// A rate limit or cooldown rejected a request
pub fn rate_limited_total(purpose: &str) {
    metrics::counter!("auth_rate_limited_total", "purpose" => purpose.to_string()).increment(1);
}

/// A revoked refresh token was presented again.
pub fn refresh_reuse_total() {
    metrics::counter!("auth_refresh_reuse_total").increment(1);
}

/// Detached email dispatch failed (`verification` or `password_reset`)
pub fn email_dispatch_failures_total(kind: &'static str) {
    metrics::counter!("auth_email_dispatch_failures_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_without_recorder() {
        login_total("success");
        refresh_total("revoked");
        rate_limited_total("login");
        refresh_reuse_total();
        email_dispatch_failures_total("verification");
    }
}
