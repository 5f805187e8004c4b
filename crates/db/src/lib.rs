//! Database layer for livepoll-rs.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use livepoll_common::{AppError, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::log::LevelFilter;
use tracing::{info, warn};

/// URL of the in-memory store used for tests and degraded mode.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// An in-memory `SQLite` database lives only as long as its connection.
const IN_MEMORY_KEEPALIVE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Initialize database connection.
///
/// Tries `database.connect_retries` times with a fixed backoff. When every
/// attempt fails and `database.fallback_in_memory` is set, a fresh in-memory
/// store is returned instead; its contents do not survive a restart.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let attempts = config.database.connect_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        {
            Ok(db) => {
                info!(attempt, "Connected to database");
                return Ok(db);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Database connection failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(config.database.retry_backoff()).await;
                }
            }
        }
    }

    let reason = last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string());

    if config.database.fallback_in_memory {
        warn!(error = %reason, "Falling back to in-memory database; data will not persist");
        return connect_in_memory()
            .await
            .map_err(|e| AppError::Database(e.to_string()));
    }

    Err(AppError::Database(format!(
        "could not connect after {attempts} attempts: {reason}"
    )))
}

/// Open a connection pool for the given URL.
pub async fn connect(
    url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(url);

    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt).await
}

/// Open a single-connection in-memory `SQLite` database.
pub async fn connect_in_memory() -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(IN_MEMORY_URL);

    opt.max_connections(1)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(IN_MEMORY_KEEPALIVE)
        .max_lifetime(IN_MEMORY_KEEPALIVE)
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Trace);

    Database::connect(opt).await
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}
