use thiserror::Error;

use crate::{
    config::ConfigurationError, persistence::error::PersistenceError, push::PushError,
    registry::RegistryError,
};

/// Errors that can occur during application context initialization.
#[derive(Debug, Error)]
pub enum AppContextError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigurationError),

    /// Persistence error.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The push transport could not be set up.
    #[error("Push transport error: {0}")]
    Push(#[from] PushError),

    /// Initialization error.
    #[error("Initialization error: {0}")]
    Initialization(#[from] InitializationError),
}

/// Errors that can occur during specific initialization steps.
#[derive(Debug, Error)]
pub enum InitializationError {
    /// Failed to rebuild the group and keyword indices.
    #[error("Failed to rebuild subscriber indices: {0}")]
    IndexRebuild(#[from] RegistryError),
}
