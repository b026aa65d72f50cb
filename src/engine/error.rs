use thiserror::Error;

use crate::{delivery::DeliveryError, persistence::error::PersistenceError, registry::RegistryError};

/// Errors that abort processing of an event or a tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The state store failed.
    #[error("State repository error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A registry lookup failed.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The delivery queue failed.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}
