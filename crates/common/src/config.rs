//! Application configuration.

use serde::Deserialize;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Caller identity and voter token configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Background status scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Long-poll change watcher configuration.
    #[serde(default)]
    pub long_poll: LongPollConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (`postgres://` or `sqlite:`).
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// How many times to try connecting before giving up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Fixed delay between connection attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Run against an in-memory store when the configured database is unreachable.
    #[serde(default = "default_true")]
    pub fallback_in_memory: bool,
}

/// Caller identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Skip ownership checks and accept unsigned voter ids.
    #[serde(default)]
    pub disabled: bool,
    /// Secret used to sign anonymous voter ids.
    #[serde(default = "default_voter_token_secret")]
    pub voter_token_secret: String,
}

/// Scheduler configuration as read from config files.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between status update ticks.
    #[serde(default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LongPollConfig {
    /// Milliseconds between change checks.
    #[serde(default = "default_long_poll_interval_ms")]
    pub interval_ms: u64,
    /// Seconds before a waiting request returns the current state.
    #[serde(default = "default_long_poll_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum number of simultaneously waiting requests.
    #[serde(default = "default_long_poll_max_waiters")]
    pub max_waiters: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            voter_token_secret: default_voter_token_secret(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_scheduler_interval_secs(),
        }
    }
}

impl SchedulerSettings {
    /// Tick interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_long_poll_interval_ms(),
            timeout_secs: default_long_poll_timeout_secs(),
            max_waiters: default_long_poll_max_waiters(),
        }
    }
}

impl LongPollConfig {
    /// Check interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Wait timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DatabaseConfig {
    /// Delay between connection attempts as a [`Duration`].
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

const fn default_connect_retries() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    2000
}

const fn default_true() -> bool {
    true
}

fn default_voter_token_secret() -> String {
    "change-me-in-production".to_string()
}

const fn default_scheduler_interval_secs() -> u64 {
    30
}

const fn default_long_poll_interval_ms() -> u64 {
    1000
}

const fn default_long_poll_timeout_secs() -> u64 {
    30
}

const fn default_long_poll_max_waiters() -> usize {
    256
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `LIVEPOLL_ENV`)
    /// 4. Environment variables with `LIVEPOLL__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("LIVEPOLL_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("LIVEPOLL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    /// Reject values the background tasks cannot run with.
    fn validated(self) -> Result<Self, config::ConfigError> {
        if self.scheduler.interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "scheduler.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.long_poll.interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "long_poll.interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
            [server]
            url = "http://localhost:8080"

            [database]
            url = "sqlite::memory:"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.connect_retries, 3);
        assert_eq!(config.database.retry_backoff(), Duration::from_secs(2));
        assert!(config.database.fallback_in_memory);
        assert!(!config.auth.disabled);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(30));
        assert_eq!(config.long_poll.interval(), Duration::from_secs(1));
        assert_eq!(config.long_poll.timeout(), Duration::from_secs(30));
        assert_eq!(config.long_poll.max_waiters, 256);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_toml_str(
            r#"
            [server]
            url = "http://polls.example"
            port = 9000

            [database]
            url = "postgres://localhost/livepoll"
            fallback_in_memory = false

            [auth]
            disabled = true

            [scheduler]
            interval_secs = 5

            [long_poll]
            timeout_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(!config.database.fallback_in_memory);
        assert!(config.auth.disabled);
        assert_eq!(config.scheduler.interval_secs, 5);
        assert_eq!(config.long_poll.timeout_secs, 10);
        assert_eq!(config.long_poll.interval_ms, 1000);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let base = r#"
            [server]
            url = "http://localhost"

            [database]
            url = "sqlite::memory:"
        "#;

        let err = Config::from_toml_str(&format!("{base}\n[scheduler]\ninterval_secs = 0\n"))
            .unwrap_err();
        assert!(err.to_string().contains("scheduler.interval_secs"));

        let err = Config::from_toml_str(&format!("{base}\n[long_poll]\ninterval_ms = 0\n"))
            .unwrap_err();
        assert!(err.to_string().contains("long_poll.interval_ms"));
    }

    #[test]
    fn test_missing_database_url_is_error() {
        let result = Config::from_toml_str(
            r#"
            [server]
            url = "http://localhost"

            [database]
            max_connections = 4
            "#,
        );
        assert!(result.is_err());
    }
}
