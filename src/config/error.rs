//! Configuration errors.

use config::ConfigError;
use thiserror::Error;

/// Errors that make the configuration unusable. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    /// No relay to poll was configured.
    #[error("No relays configured")]
    MissingRelays,

    /// No VAPID signing key was configured.
    #[error(
        "No VAPID private key configured (set push.vapid_private_key or HERALD_VAPID_PRIVATE_KEY)"
    )]
    MissingVapidKey,

    /// A setting has a value the pipeline cannot work with.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
