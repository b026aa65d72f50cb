//! Error types of the state store.

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A query or connection failed.
    #[error("A data store operation failed: {0}")]
    OperationFailed(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored value could not be encoded or decoded as JSON.
    #[error("Failed to serialize or deserialize data: {0}")]
    SerializationError(String),

    /// The embedded migrations could not be applied.
    #[error("A data migration failed: {0}")]
    MigrationError(String),

    /// The caller supplied an unusable argument (bad URL, bad id, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
