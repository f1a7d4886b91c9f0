//! SMTP delivery via lettre.

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::info;

use super::EmailNotifier;

/// SMTP connection and link settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Tokenward <no-reply@example.com>`
    pub from: String,
    /// Base URL the links point at, without trailing slash
    pub frontend_url: String,
}

/// Notifier sending plain-text mail over STARTTLS
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    frontend_url: String,
}

impl SmtpNotifier {
    /// Build the transport; no connection is made until the first send
    pub fn new(settings: &SmtpSettings) -> anyhow::Result<Self> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid EMAIL_FROM address: {}", settings.from))?;

        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .context("Failed to configure SMTP transport")?
            .port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
            frontend_url: settings.frontend_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn verification_link(&self, secret: &str) -> String {
        format!("{}/verify?token={secret}", self.frontend_url)
    }

    pub fn reset_link(&self, secret: &str) -> String {
        format!("{}/reset-password?token={secret}", self.frontend_url)
    }

    async fn send(&self, recipient: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let to = recipient
            .parse::<Mailbox>()
            .context("Invalid recipient email address")?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("Failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send email")?;
        info!(subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailNotifier for SmtpNotifier {
    async fn send_verification(&self, email: &str, secret: &str) -> anyhow::Result<()> {
        let body = format!(
            "Please verify your email address by opening the link below:\n{}\n\n\
             The link expires in 24 hours. If you did not create an account, ignore this email.",
            self.verification_link(secret)
        );
        self.send(email, "Verify your email address", body).await
    }

    async fn send_password_reset(&self, email: &str, secret: &str) -> anyhow::Result<()> {
        let body = format!(
            "We received a request to reset your password. Open the link below to choose a new one:\n{}\n\n\
             The link expires in 1 hour. If you did not request this, ignore this email.",
            self.reset_link(secret)
        );
        self.send(email, "Reset your password", body).await
    }
}
