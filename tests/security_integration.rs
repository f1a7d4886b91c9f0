//! Integration tests for rate limiting, anti-enumeration and store failures.

mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{PASSWORD, TestHarness};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;
use tokenward::AuthError;
use tokenward::auth::{HashParams, LoginRequest};
use tokenward::clock::{ManualClock, SharedClock};
use tokenward::config::{AuthConfig, TokenKey};
use tokenward::db::{MemoryUserStore, UserStore};
use tokenward::email::LogNotifier;
use tokenward::security::{RateLimitResult, WindowPolicy};
use tokenward::store::{KvStore, MemoryStore, RevokeOutcome, StoreError, StoreResult, WriteOp};
use tokenward::AuthManager;

/// Store whose every call fails
struct DownStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl KvStore for DownStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        down()
    }
    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn ttl(&self, _key: &str) -> StoreResult<Option<StdDuration>> {
        down()
    }
    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> {
        down()
    }
    async fn execute(&self, _ops: Vec<WriteOp>) -> StoreResult<()> {
        down()
    }
    async fn revoke_once(
        &self,
        _target: &str,
        _marker: &str,
        _fallback_ttl: StdDuration,
    ) -> StoreResult<RevokeOutcome> {
        down()
    }
    async fn take(&self, _key: &str) -> StoreResult<Option<String>> {
        down()
    }
    async fn window_count(&self, _key: &str, _since_ms: i64) -> StoreResult<u64> {
        down()
    }
    async fn window_admit(
        &self,
        _key: &str,
        _since_ms: i64,
        _max: u64,
        _score_ms: i64,
        _member: &str,
        _ttl: StdDuration,
    ) -> StoreResult<u64> {
        down()
    }
}

/// Memory store that counts every call
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    fn new(clock: SharedClock) -> Self {
        Self {
            inner: MemoryStore::new(clock),
            calls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// (all calls, write batches) since the last snapshot
    fn take_counts(&self) -> (usize, usize) {
        (
            self.calls.swap(0, Ordering::SeqCst),
            self.writes.swap(0, Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl KvStore for CountingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.tick();
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.tick();
        self.inner.exists(key).await
    }
    async fn ttl(&self, key: &str) -> StoreResult<Option<StdDuration>> {
        self.tick();
        self.inner.ttl(key).await
    }
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.tick();
        self.inner.delete(key).await
    }
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.tick();
        self.inner.set_members(key).await
    }
    async fn execute(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.tick();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(ops).await
    }
    async fn revoke_once(
        &self,
        target: &str,
        marker: &str,
        fallback_ttl: StdDuration,
    ) -> StoreResult<RevokeOutcome> {
        self.tick();
        self.inner.revoke_once(target, marker, fallback_ttl).await
    }
    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.tick();
        self.inner.take(key).await
    }
    async fn window_count(&self, key: &str, since_ms: i64) -> StoreResult<u64> {
        self.tick();
        self.inner.window_count(key, since_ms).await
    }
    async fn window_admit(
        &self,
        key: &str,
        since_ms: i64,
        max: u64,
        score_ms: i64,
        member: &str,
        ttl: StdDuration,
    ) -> StoreResult<u64> {
        self.tick();
        self.inner
            .window_admit(key, since_ms, max, score_ms, member, ttl)
            .await
    }
}

fn manager_with_down_store() -> (AuthManager, Arc<MemoryUserStore>) {
    let mut config = AuthConfig::new(TokenKey::new([9; 32]));
    config.hash_params = HashParams::insecure_fast();
    let clock: SharedClock = Arc::new(ManualClock::default());
    let users = Arc::new(MemoryUserStore::new(clock.clone()));
    let auth = AuthManager::new(
        &config,
        Arc::new(DownStore),
        users.clone(),
        Arc::new(LogNotifier),
        clock,
    )
    .unwrap();
    (auth, users)
}

#[tokio::test]
async fn test_reset_request_identical_for_unknown_email() {
    let h = TestHarness::new();
    h.verified_login("real@x.com").await;

    let unknown = h.auth.request_password_reset("unknown@x.com").await;
    let real = h.auth.request_password_reset("real@x.com").await;
    assert!(unknown.is_ok());
    assert!(real.is_ok());

    // Only the real account receives anything
    let sent = h.next_email().await;
    assert_eq!(sent.email, "real@x.com");
    assert!(!h.email_sent_within(StdDuration::from_millis(100)).await);
}

#[tokio::test]
async fn test_reset_request_does_same_store_work_for_unknown_email() {
    let mut config = AuthConfig::new(TokenKey::new([9; 32]));
    config.hash_params = HashParams::insecure_fast();
    let clock: SharedClock = Arc::new(ManualClock::default());
    let store = Arc::new(CountingStore::new(clock.clone()));
    let users = Arc::new(MemoryUserStore::new(clock.clone()));
    let auth = AuthManager::new(
        &config,
        store.clone(),
        users.clone(),
        Arc::new(LogNotifier),
        clock,
    )
    .unwrap();
    users.create("real@x.com", "hash", "verification").await.unwrap();
    store.take_counts();

    auth.request_password_reset("real@x.com").await.unwrap();
    let known = store.take_counts();
    auth.request_password_reset("unknown@x.com").await.unwrap();
    let unknown = store.take_counts();

    assert_eq!(known, (1, 1));
    assert_eq!(unknown, known);
}

#[tokio::test]
async fn test_resend_identical_for_every_account_state() {
    let h = TestHarness::new();
    h.register("pending@x.com").await;
    h.verified_login("done@x.com").await;

    for email in ["pending@x.com", "done@x.com", "nobody@x.com"] {
        assert!(h.auth.resend_verification(email).await.is_ok());
    }
}

#[tokio::test]
async fn test_reset_request_rejects_only_malformed_email() {
    let h = TestHarness::new();
    let err = h.auth.request_password_reset("not-an-email").await.unwrap_err();
    assert_eq!(err.code(), "EMAIL_INVALID");
}

#[tokio::test]
async fn test_ip_window_locks_then_slides() {
    let mut config = AuthConfig::new(TokenKey::new([42; 32]));
    config.hash_params = HashParams::insecure_fast();
    config.ip_limit = WindowPolicy::new(3, StdDuration::from_secs(60));
    let h = TestHarness::with_config(config);

    for _ in 0..3 {
        h.auth.guard_ip("login", "10.0.0.1").await.unwrap();
    }
    let err = h.auth.guard_ip("login", "10.0.0.1").await.unwrap_err();
    assert!(matches!(err, AuthError::RateLimited { retry_after_secs: 60 }));

    // Other purposes and other addresses are independent
    h.auth.guard_ip("register", "10.0.0.1").await.unwrap();
    h.auth.guard_ip("login", "10.0.0.2").await.unwrap();

    h.clock.advance(Duration::seconds(60));
    h.auth.guard_ip("login", "10.0.0.1").await.unwrap();
}

#[tokio::test]
async fn test_window_exceeded_then_cleared_without_events() {
    let h = TestHarness::new();
    let limiter = h.auth.rate_limiter();
    let policy = WindowPolicy::per_ip();

    for _ in 0..policy.max_events {
        limiter.record_window("login", "10.0.0.1", &policy).await.unwrap();
    }
    let result = limiter.check_window("login", "10.0.0.1", &policy).await.unwrap();
    assert!(result.is_exceeded());

    h.clock.advance(Duration::minutes(15));
    let result = limiter.check_window("login", "10.0.0.1", &policy).await.unwrap();
    assert_eq!(
        result,
        RateLimitResult::Allowed {
            remaining: policy.max_events
        }
    );
}

#[tokio::test]
async fn test_email_cooldown_is_normalized() {
    let h = TestHarness::new();

    h.auth
        .guard_email_cooldown("password_reset", "A@X.com")
        .await
        .unwrap();
    let err = h
        .auth
        .guard_email_cooldown("password_reset", " a@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::RateLimited { retry_after_secs: 120 }));

    // Independent of whether the account exists, and of other purposes
    h.auth
        .guard_email_cooldown("resend_verification", "a@x.com")
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(2));
    h.auth
        .guard_email_cooldown("password_reset", "a@x.com")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_limiter_fails_open() {
    let (auth, _) = manager_with_down_store();
    auth.guard_ip("login", "10.0.0.1").await.unwrap();
    auth.guard_email_cooldown("password_reset", "a@x.com")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_fails_closed_without_store() {
    let (auth, users) = manager_with_down_store();
    auth.register(tokenward::auth::RegisterRequest {
        email: "a@x.com".to_string(),
        password: PASSWORD.to_string(),
    })
    .await
    .unwrap();
    let user = users.by_email("a@x.com").await.unwrap().unwrap();
    users.mark_verified(user.id).await.unwrap();

    let result = auth
        .login(LoginRequest {
            email: "a@x.com".to_string(),
            password: PASSWORD.to_string(),
        })
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::StoreUnavailable(_)));
    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert!(!err.client_message().contains("connection refused"));
}

#[tokio::test]
async fn test_best_effort_paths_swallow_store_failures() {
    let (auth, _) = manager_with_down_store();
    auth.register(tokenward::auth::RegisterRequest {
        email: "a@x.com".to_string(),
        password: PASSWORD.to_string(),
    })
    .await
    .unwrap();

    auth.logout("some-refresh-token").await;
    assert!(auth.request_password_reset("a@x.com").await.is_ok());
    assert!(auth.resend_verification("a@x.com").await.is_ok());

    let refresh = auth.refresh("some-refresh-token").await;
    assert!(matches!(refresh, Err(AuthError::StoreUnavailable(_))));
}
