//! Shared harness for the integration tests.
//!
//! Everything runs in process: `MemoryStore` and `MemoryUserStore` share one
//! `ManualClock`, and a recording notifier captures the secrets that would
//! otherwise leave through email.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokenward::auth::{AuthTokens, HashParams, LoginRequest, RegisterRequest, User};
use tokenward::clock::{ManualClock, SharedClock};
use tokenward::config::{AuthConfig, TokenKey};
use tokenward::db::MemoryUserStore;
use tokenward::email::{EmailKind, EmailNotifier, SharedNotifier};
use tokenward::store::{MemoryStore, SharedStore};
use tokenward::AuthManager;
use tokio::sync::{Mutex, mpsc};

pub const PASSWORD: &str = "password1";

/// Captured outbound email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub kind: EmailKind,
    pub email: String,
    pub secret: String,
}

/// Notifier that forwards every message to a channel
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<SentEmail>,
}

#[async_trait]
impl EmailNotifier for RecordingNotifier {
    async fn send_verification(&self, email: &str, secret: &str) -> anyhow::Result<()> {
        self.tx.send(SentEmail {
            kind: EmailKind::Verification,
            email: email.to_string(),
            secret: secret.to_string(),
        })?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, secret: &str) -> anyhow::Result<()> {
        self.tx.send(SentEmail {
            kind: EmailKind::PasswordReset,
            email: email.to_string(),
            secret: secret.to_string(),
        })?;
        Ok(())
    }
}

pub struct TestHarness {
    pub auth: AuthManager,
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub users: Arc<MemoryUserStore>,
    pub config: AuthConfig,
    outbox: Mutex<mpsc::UnboundedReceiver<SentEmail>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let mut config = AuthConfig::new(TokenKey::new([42; 32]));
        config.hash_params = HashParams::insecure_fast();
        Self::with_config(config)
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let clock = ManualClock::default();
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(shared_clock.clone()));
        let users = Arc::new(MemoryUserStore::new(shared_clock.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier: SharedNotifier = Arc::new(RecordingNotifier { tx });

        let auth = AuthManager::new(
            &config,
            store.clone() as SharedStore,
            users.clone(),
            notifier,
            shared_clock,
        )
        .expect("Failed to build auth manager");

        Self {
            auth,
            clock,
            store,
            users,
            config,
            outbox: Mutex::new(rx),
        }
    }

    /// Next email dispatched by the manager
    pub async fn next_email(&self) -> SentEmail {
        let mut outbox = self.outbox.lock().await;
        tokio::time::timeout(Duration::from_secs(5), outbox.recv())
            .await
            .expect("Timed out waiting for email")
            .expect("Notifier dropped")
    }

    /// Whether an email arrives within a short grace period
    pub async fn email_sent_within(&self, wait: Duration) -> bool {
        let mut outbox = self.outbox.lock().await;
        matches!(tokio::time::timeout(wait, outbox.recv()).await, Ok(Some(_)))
    }

    pub async fn register(&self, email: &str) -> (User, String) {
        let user = self
            .auth
            .register(RegisterRequest {
                email: email.to_string(),
                password: PASSWORD.to_string(),
            })
            .await
            .expect("Registration should succeed");
        let sent = self.next_email().await;
        assert_eq!(sent.kind, EmailKind::Verification);
        (user, sent.secret)
    }

    /// Register, verify and log in
    pub async fn verified_login(&self, email: &str) -> (User, AuthTokens) {
        let (user, secret) = self.register(email).await;
        self.auth
            .verify_email(&secret)
            .await
            .expect("Verification should succeed");
        let tokens = self.login(email, PASSWORD).await.expect("Login should succeed");
        (user, tokens)
    }

    pub async fn login(&self, email: &str, password: &str) -> tokenward::AuthResult<AuthTokens> {
        self.auth
            .login(LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
    }
}
