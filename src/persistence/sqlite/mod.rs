//! This module provides a concrete implementation of the storage traits using
//! SQLite.

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

pub mod event_store;
pub mod key_value_store;

use crate::persistence::error::PersistenceError;

/// A concrete implementation of the storage traits using SQLite.
pub struct SqliteStateRepository {
    /// The SQLite connection pool used for database operations.
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new instance of SqliteStateRepository with the provided
    /// database URL. This will create the database file if it does not
    /// exist.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        tracing::debug!(database_url, "Attempting to connect to SQLite database.");
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PersistenceError::InvalidInput(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            PersistenceError::OperationFailed(format!("Failed to connect to database: {}", e))
        })?;
        tracing::info!(database_url, "Successfully connected to SQLite database.");
        Ok(Self { pool })
    }

    /// Runs database migrations.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Running database migrations.");
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run database migrations.");
            PersistenceError::MigrationError(e.to_string())
        })?;
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    /// Gets access to the underlying connection pool for advanced operations.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection pool gracefully.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        tracing::debug!("Closing SQLite connection pool.");
        self.pool.close().await;
        tracing::info!("SQLite connection pool closed successfully.");
    }

    /// Ensures all pending writes are flushed to the main database file.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Flushing pending writes to disk.");

        // FULL for the checkpoint, NORMAL again for regular operation.
        self.set_synchronous_mode("FULL").await?;
        self.checkpoint_wal("TRUNCATE").await?;
        self.set_synchronous_mode("NORMAL").await?;

        tracing::debug!("Pending writes flushed successfully.");
        Ok(())
    }

    /// Performs cleanup before shutdown: truncates the WAL file.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn cleanup(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Performing state repository cleanup.");
        self.checkpoint_wal("TRUNCATE").await?;
        tracing::debug!("State repository cleanup completed.");
        Ok(())
    }

    /// Internal helper to execute a PRAGMA command with error handling
    async fn execute_pragma(&self, pragma: &str, operation: &str) -> Result<(), PersistenceError> {
        sqlx::query(pragma)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, pragma = %pragma, operation = %operation, "Failed to execute PRAGMA command.");
                PersistenceError::OperationFailed(e.to_string())
            })?;
        Ok(())
    }

    /// Performs a WAL checkpoint with the specified mode
    async fn checkpoint_wal(&self, mode: &str) -> Result<(), PersistenceError> {
        let allowed_modes = ["PASSIVE", "FULL", "RESTART", "TRUNCATE"];
        if !allowed_modes.contains(&mode) {
            return Err(PersistenceError::InvalidInput(format!(
                "Invalid WAL checkpoint mode: {}",
                mode
            )));
        }
        let pragma = format!("PRAGMA wal_checkpoint({mode})");
        self.execute_pragma(&pragma, &format!("WAL checkpoint {mode}")).await
    }

    /// Sets the synchronous mode
    async fn set_synchronous_mode(&self, mode: &str) -> Result<(), PersistenceError> {
        let allowed_modes = ["OFF", "NORMAL", "FULL"];
        if !allowed_modes.contains(&mode) {
            return Err(PersistenceError::InvalidInput(format!(
                "Invalid synchronous mode: {}",
                mode
            )));
        }
        let pragma = format!("PRAGMA synchronous = {mode}");
        self.execute_pragma(&pragma, &format!("set synchronous mode to {mode}")).await
    }

    /// Helper to execute database queries with consistent error handling
    async fn execute_query_with_error_handling<F, T, E>(
        &self,
        operation: &str,
        query_fn: F,
    ) -> Result<T, PersistenceError>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        query_fn.await.map_err(|e| {
            tracing::error!(error = %e, operation = %operation, "Database operation failed.");
            PersistenceError::OperationFailed(e.to_string())
        })
    }
}
