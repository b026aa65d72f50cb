use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use super::{
    ConfigurationError, DeliveryConfig, NotificationPolicyConfig, PushConfig, ServerConfig,
    deserialize_duration_from_ms, deserialize_duration_from_seconds, deserialize_urls,
};
use crate::models::event::default_watched_kinds;

/// Provides the default value for database_url.
fn default_database_url() -> String {
    "sqlite:herald.db".to_string()
}

/// Provides the default value for tick_interval.
fn default_tick_interval() -> Duration {
    Duration::from_secs(300)
}

/// Provides the default value for relay_timeout.
fn default_relay_timeout() -> Duration {
    Duration::from_millis(5000)
}

/// Provides the default value for relay_fetch_limit.
fn default_relay_fetch_limit() -> usize {
    500
}

/// Provides the default value for initial_lookback.
fn default_initial_lookback() -> Duration {
    Duration::from_secs(3600)
}

/// Provides the default value for processed_event_ttl.
fn default_processed_event_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

/// Provides the default value for shutdown_timeout.
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Application configuration for Herald.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Database URL for the SQLite database.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Relays polled on every tick.
    #[serde(default, deserialize_with = "deserialize_urls")]
    pub relays: Vec<Url>,

    /// Interval between two pipeline runs.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_tick_interval"
    )]
    pub tick_interval: Duration,

    /// Time a relay is given to reach end-of-stored-events.
    #[serde(deserialize_with = "deserialize_duration_from_ms", default = "default_relay_timeout")]
    pub relay_timeout: Duration,

    /// Maximum number of events requested from one relay per pass.
    #[serde(default = "default_relay_fetch_limit")]
    pub relay_fetch_limit: usize,

    /// How far back to look for a relay that has no watermark yet.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_initial_lookback"
    )]
    pub initial_lookback: Duration,

    /// Event kinds requested from relays.
    #[serde(default = "default_watched_kinds")]
    pub watched_kinds: Vec<u16>,

    /// Retention of processed-event markers.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_processed_event_ttl"
    )]
    pub processed_event_ttl: Duration,

    /// The maximum time to wait for graceful shutdown.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,

    /// Preference, rate and formatting policy.
    #[serde(default)]
    pub notifications: NotificationPolicyConfig,

    /// Delivery queue retry settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Web Push signing settings.
    #[serde(default)]
    pub push: PushConfig,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            relays: Vec::new(),
            tick_interval: default_tick_interval(),
            relay_timeout: default_relay_timeout(),
            relay_fetch_limit: default_relay_fetch_limit(),
            initial_lookback: default_initial_lookback(),
            watched_kinds: default_watched_kinds(),
            processed_event_ttl: default_processed_event_ttl(),
            shutdown_timeout: default_shutdown_timeout(),
            notifications: NotificationPolicyConfig::default(),
            delivery: DeliveryConfig::default(),
            push: PushConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading `app.yaml` from the configuration
    /// directory and applying `HERALD__*` environment overrides.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir_str = config_dir.unwrap_or("configs");
        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/app.yaml", config_dir_str)))
            .add_source(
                Environment::with_prefix("HERALD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("relays")
                    .with_list_parse_key("watched_kinds")
                    .with_list_parse_key("notifications.urgent_keywords")
                    .with_list_parse_key("delivery.backoff_schedule")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    /// Loads and validates the configuration. Any error here is fatal: the
    /// pipeline must not run with a partial configuration.
    pub fn load(config_dir: Option<&str>) -> Result<Self, ConfigurationError> {
        let config = Self::new(config_dir)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings the pipeline cannot run without.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.relays.is_empty() {
            return Err(ConfigurationError::MissingRelays);
        }
        if self.push.vapid_private_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigurationError::MissingVapidKey);
        }
        if self.delivery.backoff_schedule.is_empty() {
            return Err(ConfigurationError::Invalid(
                "delivery.backoff_schedule must not be empty".to_string(),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(ConfigurationError::Invalid(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.delivery.concurrency == 0 {
            return Err(ConfigurationError::Invalid(
                "delivery.concurrency must be at least 1".to_string(),
            ));
        }
        if self.watched_kinds.is_empty() {
            return Err(ConfigurationError::Invalid("watched_kinds must not be empty".to_string()));
        }
        Ok(())
    }

    /// Creates a new `AppConfigBuilder` for testing purposes.
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// A builder for creating `AppConfig` instances in tests.
#[derive(Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Sets the relay list.
    pub fn relays(mut self, relays: Vec<Url>) -> Self {
        self.config.relays = relays;
        self
    }

    /// Sets the database URL.
    pub fn database_url(mut self, url: &str) -> Self {
        self.config.database_url = url.to_string();
        self
    }

    /// Sets the relay timeout.
    pub fn relay_timeout(mut self, timeout: Duration) -> Self {
        self.config.relay_timeout = timeout;
        self
    }

    /// Sets the VAPID private key.
    pub fn vapid_private_key(mut self, key: &str) -> Self {
        self.config.push.vapid_private_key = Some(key.to_string());
        self
    }

    /// Sets the notification policy.
    pub fn notifications(mut self, notifications: NotificationPolicyConfig) -> Self {
        self.config.notifications = notifications;
        self
    }

    /// Sets the delivery settings.
    pub fn delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.config.delivery = delivery;
        self
    }

    /// Sets the server settings.
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> tempfile::TempDir {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), content).unwrap();
        temp_dir
    }

    #[test]
    fn test_app_config_builder() {
        let relays = vec![Url::parse("wss://relay.example.com").unwrap()];
        let config = AppConfig::builder()
            .relays(relays)
            .database_url("sqlite::memory:")
            .vapid_private_key("key")
            .build();

        assert_eq!(config.relays.len(), 1);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.tick_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_file() {
        let temp_dir = write_config(
            r#"
        database_url: "sqlite::memory:"
        relays:
          - "wss://relay.one"
          - "wss://relay.two"
        tick_interval: 60
        relay_timeout: 2000
        notifications:
          rate_limit_max: 5
          urgent_keywords: ["fire"]
        delivery:
          backoff_schedule: [2, 4, 8]
        push:
          vapid_private_key: "abc"
          vapid_subject: "mailto:ops@example.com"
        "#,
        );

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.relay_timeout, Duration::from_millis(2000));
        assert_eq!(config.relay_fetch_limit, 500);
        assert_eq!(config.initial_lookback, Duration::from_secs(3600));
        assert_eq!(config.processed_event_ttl, Duration::from_secs(86_400));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.notifications.rate_limit_max, 5);
        assert!(config.notifications.is_urgent_keyword("FIRE"));
        assert_eq!(config.delivery.backoff_for(3), Duration::from_secs(8));
        assert_eq!(config.push.vapid_subject, "mailto:ops@example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_relays() {
        let config = AppConfig::builder().vapid_private_key("key").build();
        assert!(matches!(config.validate(), Err(ConfigurationError::MissingRelays)));
    }

    #[test]
    fn test_validate_rejects_missing_vapid_key() {
        let config = AppConfig::builder()
            .relays(vec![Url::parse("wss://relay.example.com").unwrap()])
            .build();
        let mut config = config;
        config.push.vapid_private_key = None;
        assert!(matches!(config.validate(), Err(ConfigurationError::MissingVapidKey)));
    }

    #[test]
    fn test_validate_rejects_empty_backoff_schedule() {
        let mut config = AppConfig::builder()
            .relays(vec![Url::parse("wss://relay.example.com").unwrap()])
            .vapid_private_key("key")
            .build();
        config.delivery.backoff_schedule.clear();
        assert!(matches!(config.validate(), Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_app_config_from_file_with_env_var_override() {
        let temp_dir = write_config(
            r#"
        database_url: "sqlite::memory:"
        relays:
          - "wss://relay.one"
        "#,
        );

        unsafe {
            std::env::set_var("HERALD__RELAYS", "wss://override.one,wss://override.two");
        }

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();

        unsafe {
            std::env::remove_var("HERALD__RELAYS");
        }

        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.relays[0].as_str(), "wss://override.one/");
        assert_eq!(config.relays[1].as_str(), "wss://override.two/");
    }
}
