//! Outbound email capability.
//!
//! The auth core never awaits delivery. [`dispatch_detached`] hands the send
//! to its own task, independent of the request that triggered it, and
//! failures are observable only through logs and the
//! `auth_email_dispatch_failures_total` counter.

pub mod smtp;

pub use smtp::{SmtpNotifier, SmtpSettings};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics;

/// Sends the out-of-band links that carry ephemeral secrets
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    /// Send the account verification link
    async fn send_verification(&self, email: &str, secret: &str) -> anyhow::Result<()>;

    /// Send the password reset link
    async fn send_password_reset(&self, email: &str, secret: &str) -> anyhow::Result<()>;
}

/// Shared notifier handle
pub type SharedNotifier = Arc<dyn EmailNotifier>;

/// Which message to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
}

impl EmailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailKind::Verification => "verification",
            EmailKind::PasswordReset => "password_reset",
        }
    }
}

/// Notifier that only logs; selected when SMTP is not configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl EmailNotifier for LogNotifier {
    async fn send_verification(&self, email: &str, _secret: &str) -> anyhow::Result<()> {
        info!(email, "SMTP not configured; verification email not sent");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, _secret: &str) -> anyhow::Result<()> {
        info!(email, "SMTP not configured; password reset email not sent");
        Ok(())
    }
}

/// Pick the notifier for the given settings
///
/// `None` selects [`LogNotifier`].
pub fn build_notifier(smtp: Option<&SmtpSettings>) -> anyhow::Result<SharedNotifier> {
    match smtp {
        Some(settings) => {
            info!(host = %settings.host, port = settings.port, "Using SMTP notifier");
            Ok(Arc::new(SmtpNotifier::new(settings)?))
        }
        None => {
            warn!("SMTP_HOST not set; emails will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Send an email on a detached task
///
/// The returned handle may be dropped; the send still runs to completion.
pub fn dispatch_detached(
    notifier: SharedNotifier,
    kind: EmailKind,
    email: String,
    secret: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = match kind {
            EmailKind::Verification => notifier.send_verification(&email, &secret).await,
            EmailKind::PasswordReset => notifier.send_password_reset(&email, &secret).await,
        };
        if let Err(e) = result {
            metrics::email_dispatch_failures_total(kind.as_str());
            warn!(email = %email, kind = kind.as_str(), error = %e, "Failed to send email");
        }
    })
}
