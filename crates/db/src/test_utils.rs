//! Test utilities for database operations.
//!
//! Provides migrated throwaway databases so service and API tests can run
//! real queries without an external server: a single-connection in-memory
//! store, and a file-backed store with a real connection pool for tests
//! where transactions must actually overlap.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::debug;

use crate::migrations::Migrator;

/// A migrated, throwaway test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
    /// Directory holding a file-backed database; removed on drop.
    #[cfg(feature = "test-utils")]
    _dir: Option<tempfile::TempDir>,
}

impl TestDatabase {
    /// Create a fresh in-memory database with all migrations applied.
    ///
    /// Every call returns an independent database.
    pub async fn in_memory() -> Result<Self, DbErr> {
        let conn = crate::connect_in_memory().await?;
        Migrator::up(&conn, None).await?;

        debug!("Created in-memory test database");

        Ok(Self {
            conn: Arc::new(conn),
            #[cfg(feature = "test-utils")]
            _dir: None,
        })
    }

    /// Create a migrated `SQLite` database in a temporary file, served by a
    /// pool of up to `max_connections` connections.
    #[cfg(feature = "test-utils")]
    pub async fn file_backed(max_connections: u32) -> Result<Self, DbErr> {
        let dir = tempfile::tempdir().map_err(|e| DbErr::Custom(e.to_string()))?;
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("livepoll.db").display()
        );

        let conn = crate::connect(&url, max_connections, 1).await?;
        Migrator::up(&conn, None).await?;

        debug!(max_connections, "Created file-backed test database");

        Ok(Self {
            conn: Arc::new(conn),
            _dir: Some(dir),
        })
    }

    /// Get the database connection.
    #[must_use]
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.conn)
    }
}
