//! Configuration module for Herald.

mod app_config;
mod delivery;
mod error;
mod helpers;
mod notifications;
mod push;
mod server;

pub use app_config::{AppConfig, AppConfigBuilder};
pub use delivery::DeliveryConfig;
pub use error::ConfigurationError;
pub use helpers::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds,
    deserialize_durations_from_seconds, deserialize_urls,
};
pub use notifications::NotificationPolicyConfig;
pub use push::PushConfig;
pub use server::ServerConfig;
