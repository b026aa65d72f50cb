use thiserror::Error;

use crate::{persistence::error::PersistenceError, registry::RegistryError};

/// Errors raised by the delivery queue itself, as opposed to failed pushes.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Reading or writing queue items failed.
    #[error("Queue storage error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Looking up or removing the recipient failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The recipient does not exist.
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(String),
}
