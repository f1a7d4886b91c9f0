//! Structured logging configuration.
//!
//! Secrets never reach a log line. Email addresses and user ids are logged as
//! structured fields so security events can be correlated.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,redis=warn";

/// Output format for [`init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` (`json` selects [`LogFormat::Json`])
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber
///
/// Filtering follows `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. Calling
/// this twice is a no-op apart from a warning on stderr from the second call.
///
/// # Example
///
/// ```no_run
/// use tokenward::logging::{self, LogFormat};
///
/// logging::init(LogFormat::from_env());
/// tracing::info!("Auth service starting");
/// ```
pub fn init(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
    };

    match result {
        Ok(()) => tracing::info!(?format, "Structured logging initialized"),
        Err(e) => eprintln!("Logging already initialized: {e}"),
    }
}

/// Log security event with structured data
///
/// # Arguments
///
/// * `event_type` - Type of security event
/// * `user_id` - Optional user ID
/// * `identity` - Optional IP address or email the event is keyed on
/// * `message` - Event message
///
/// # Example
///
/// ```
/// use tokenward::logging::log_security_event;
///
/// log_security_event(
///     "refresh_token_reuse",
///     None,
///     Some("192.168.1.1"),
///     "Revoked refresh token presented",
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    user_id: Option<uuid::Uuid>,
    identity: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id.map(|id| id.to_string()),
        identity = identity,
        "SECURITY: {}",
        message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_security_event() {
        log_security_event("test_event", Some(uuid::Uuid::new_v4()), Some("127.0.0.1"), "Test");
        log_security_event("test_event", None, None, "Test");
    }

    #[test]
    #[serial]
    fn test_log_format_from_env() {
        unsafe { std::env::set_var("LOG_FORMAT", "JSON") };
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        unsafe { std::env::set_var("LOG_FORMAT", "text") };
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        unsafe { std::env::remove_var("LOG_FORMAT") };
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    }
}
