//! Auth service configuration.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration;
use std::fmt;
use std::time::Duration as StdDuration;

use crate::auth::password::HashParams;
use crate::auth::token::KEY_LEN;
use crate::db::DatabaseConfig;
use crate::email::SmtpSettings;
use crate::security::{CooldownPolicy, WindowPolicy};

/// Access token encryption key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct TokenKey([u8; KEY_LEN]);

impl TokenKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse 64 hex characters
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            var: "TOKEN_KEY".to_string(),
            reason: reason.to_string(),
        };
        let bytes = hex::decode(hex_key.trim()).map_err(|_| invalid("Must be hex encoded"))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| invalid("Must be exactly 32 bytes (64 hex characters)"))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenKey(..)")
    }
}

/// Complete auth configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access token key (required)
    pub token_key: TokenKey,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Measured from the last (re)send
    pub verification_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub hash_params: HashParams,
    pub redis_url: String,
    /// Budget for each key-value store call
    pub store_timeout: StdDuration,
    /// Per-IP sliding window shared by every entry point
    pub ip_limit: WindowPolicy,
    /// Per-email cooldown for resend and reset requests
    pub email_cooldown: CooldownPolicy,
    /// `None` selects the logging notifier
    pub smtp: Option<SmtpSettings>,
    pub database: DatabaseConfig,
}

impl AuthConfig {
    /// Defaults for everything except the key
    pub fn new(token_key: TokenKey) -> Self {
        Self {
            token_key,
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            verification_token_ttl: Duration::hours(24),
            reset_token_ttl: Duration::hours(1),
            hash_params: HashParams::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            store_timeout: StdDuration::from_millis(2000),
            ip_limit: WindowPolicy::per_ip(),
            email_cooldown: CooldownPolicy::per_email(),
            smtp: None,
            database: DatabaseConfig::development(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Reads a `.env` file first when present.
    ///
    /// # Errors
    ///
    /// * `ConfigError::MissingRequired` - `TOKEN_KEY` unset
    /// * `ConfigError::Invalid` - A value is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let token_key = std::env::var("TOKEN_KEY").map_err(|_| ConfigError::MissingRequired {
            var: "TOKEN_KEY".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;
        let mut config = Self::new(TokenKey::from_hex(&token_key)?);

        config.access_token_ttl = parse_ttl_secs("ACCESS_TOKEN_TTL_SECS", 900)?;
        config.refresh_token_ttl = parse_ttl_secs("REFRESH_TOKEN_TTL_SECS", 604_800)?;
        config.verification_token_ttl = parse_ttl_secs("VERIFICATION_TOKEN_TTL_SECS", 86_400)?;
        config.reset_token_ttl = parse_ttl_secs("RESET_TOKEN_TTL_SECS", 3600)?;

        config.hash_params = HashParams {
            memory_kib: parse_env_or("ARGON2_MEMORY_KIB", 64 * 1024)?,
            iterations: parse_env_or("ARGON2_ITERATIONS", 3)?,
            parallelism: parse_env_or("ARGON2_PARALLELISM", 4)?,
        };

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        }
        config.store_timeout = StdDuration::from_millis(parse_env_or("STORE_TIMEOUT_MS", 2000)?);

        config.ip_limit = WindowPolicy::new(
            parse_env_or("RATE_LIMIT_IP_MAX", 10)?,
            StdDuration::from_secs(parse_env_or("RATE_LIMIT_IP_WINDOW_SECS", 900)?),
        );
        config.email_cooldown =
            CooldownPolicy::new(StdDuration::from_secs(parse_env_or("EMAIL_COOLDOWN_SECS", 120)?));

        config.smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpSettings {
                host,
                port: parse_env_or("SMTP_PORT", 587)?,
                username: std::env::var("SMTP_USER").ok().filter(|v| !v.is_empty()),
                password: std::env::var("SMTP_PASS").ok().filter(|v| !v.is_empty()),
                from: std::env::var("EMAIL_FROM")
                    .unwrap_or_else(|_| "no-reply@localhost".to_string()),
                frontend_url: std::env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            }),
            _ => None,
        };

        config.database = DatabaseConfig::from_env();
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ACCESS_TOKEN_TTL_SECS", self.access_token_ttl),
            ("REFRESH_TOKEN_TTL_SECS", self.refresh_token_ttl),
            ("VERIFICATION_TOKEN_TTL_SECS", self.verification_token_ttl),
            ("RESET_TOKEN_TTL_SECS", self.reset_token_ttl),
        ];
        for (var, ttl) in positive {
            if ttl <= Duration::zero() {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
            if ttl > Duration::seconds(MAX_TTL_SECS) {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: format!("Must be at most {MAX_TTL_SECS}s (10 years)"),
                });
            }
        }

        if self.access_token_ttl >= self.refresh_token_ttl {
            return Err(ConfigError::Invalid {
                var: "ACCESS_TOKEN_TTL_SECS".to_string(),
                reason: format!(
                    "Must be shorter than the refresh token TTL ({}s)",
                    self.refresh_token_ttl.num_seconds()
                ),
            });
        }

        if let Err(e) = self.hash_params.to_argon2() {
            return Err(ConfigError::Invalid {
                var: "ARGON2_MEMORY_KIB/ARGON2_ITERATIONS/ARGON2_PARALLELISM".to_string(),
                reason: e.to_string(),
            });
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "STORE_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.ip_limit.max_events == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_IP_MAX".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.ip_limit.window.is_zero() {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_IP_WINDOW_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.email_cooldown.duration.is_zero() {
            return Err(ConfigError::Invalid {
                var: "EMAIL_COOLDOWN_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Upper bound for every token lifetime
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Parse a lifetime in seconds, rejecting values chrono cannot represent
fn parse_ttl_secs(key: &str, default: i64) -> Result<Duration, ConfigError> {
    let secs = parse_env_or(key, default)?;
    Duration::try_seconds(secs).ok_or_else(|| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("{secs}s is out of range"),
    })
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("Cannot parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
