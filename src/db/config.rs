//! Database configuration module.

use std::env;

/// PostgreSQL pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Acquire timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `DATABASE_URL`: PostgreSQL connection string (default: development URL)
    /// - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
    /// - `DB_MIN_CONNECTIONS`: Minimum pool size (default: 1)
    /// - `DB_CONNECTION_TIMEOUT`: Acquire timeout in seconds (default: 5)
    /// - `DB_IDLE_TIMEOUT`: Idle timeout in seconds (default: 600)
    /// - `DB_MAX_LIFETIME`: Max lifetime in seconds (default: 1800)
    ///
    /// Unparseable numbers fall back to their defaults; the caller validates
    /// the result.
    pub fn from_env() -> Self {
        let defaults = Self::development();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_or(
                "DB_CONNECTION_TIMEOUT",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_or("DB_IDLE_TIMEOUT", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_or("DB_MAX_LIFETIME", defaults.max_lifetime_secs),
        }
    }

    /// Local development defaults
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/tokenward".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_secs: 5,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_overrides_defaults() {
        unsafe {
            env::set_var("DB_MAX_CONNECTIONS", "42");
            env::set_var("DB_IDLE_TIMEOUT", "not-a-number");
        }

        let config = DatabaseConfig::from_env();
        assert_eq!(config.max_connections, 42);
        assert_eq!(config.idle_timeout_secs, 600);

        unsafe {
            env::remove_var("DB_MAX_CONNECTIONS");
            env::remove_var("DB_IDLE_TIMEOUT");
        }
    }
}
