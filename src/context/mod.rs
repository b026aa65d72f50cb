//! Application context and initialization logic.
//! This module handles loading and validating configuration, setting up the
//! database, repairing the subscriber indices and restoring the metrics and
//! log snapshots of the previous run. The `AppContext` struct encapsulates
//! these components for use throughout the application.

mod error;
mod logs;
mod metrics;

use std::sync::Arc;

pub use error::{AppContextError, InitializationError};
pub use logs::{LogBuffer, LogBufferLayer, LogEntry, LogLevel, MAX_LOG_ENTRIES};
pub use metrics::{AppMetrics, MAX_DELIVERY_SAMPLES, Metrics, MetricsSnapshot};

use crate::{
    config::AppConfig,
    persistence::{
        keys::{LOG_BUFFER_KEY, METRICS_SNAPSHOT_KEY},
        sqlite::SqliteStateRepository,
        traits::{AppRepository, KeyValueStore},
    },
    push::WebPushTransport,
    registry::SubscriberRegistry,
};

/// The application context, holding configuration, the state repository,
/// the subscriber registry, shared observability state and the push
/// transport.
pub struct AppContext<T: AppRepository> {
    /// Shared application configuration.
    pub config: AppConfig,

    /// The state repository for database interactions.
    pub repo: Arc<T>,

    /// The subscriber registry over `repo`.
    pub registry: Arc<SubscriberRegistry<T>>,

    /// Delivery and pipeline counters.
    pub metrics: AppMetrics,

    /// Recent log entries.
    pub logs: LogBuffer,

    /// The signed, encrypted Web Push transport.
    pub transport: Arc<WebPushTransport>,
}

/// A builder for the `AppContext`, allowing configuration overrides
/// and step-by-step initialization.
pub struct AppContextBuilder {
    /// Optional configuration directory to load settings from.
    config_dir: Option<String>,

    /// Optional override for the database URL.
    database_url_override: Option<String>,

    /// Log buffer already wired into the tracing subscriber.
    logs: Option<LogBuffer>,
}

impl AppContextBuilder {
    /// Creates a new `AppContextBuilder` with an optional configuration
    /// directory.
    pub fn new(config_dir: Option<String>) -> Self {
        Self { config_dir, database_url_override: None, logs: None }
    }

    /// Sets a database URL override.
    pub fn database_url(mut self, url: String) -> Self {
        self.database_url_override = Some(url);
        self
    }

    /// Uses `logs` as the log buffer instead of a fresh one.
    pub fn log_buffer(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Builds the `AppContext`, performing all initialization steps.
    /// A configuration that fails validation aborts startup.
    pub async fn build(self) -> Result<AppContext<SqliteStateRepository>, AppContextError> {
        tracing::debug!("Loading application configuration...");
        let mut config = AppConfig::load(self.config_dir.as_deref())?;
        tracing::debug!(database_url = %config.database_url, relays = config.relays.len(), "Configuration loaded.");

        if let Some(db_url) = self.database_url_override {
            tracing::info!(
                database_url = %db_url,
                "Overriding database URL."
            );
            config.database_url = db_url;
        }

        tracing::debug!("Initializing state repository...");
        let repo = Arc::new(SqliteStateRepository::new(&config.database_url).await?);
        repo.run_migrations().await?;
        tracing::info!("Database migrations completed.");

        let transport = Arc::new(WebPushTransport::new(&config.push, config.delivery.send_timeout)?);

        let registry = Arc::new(SubscriberRegistry::new(repo.clone()));
        let entries = registry.rebuild_indices().await.map_err(InitializationError::from)?;
        tracing::info!(entries, "Subscriber indices rebuilt.");

        let metrics = AppMetrics::default();
        let logs = self.logs.unwrap_or_default();
        restore_snapshots(repo.as_ref(), &metrics, &logs).await;

        Ok(AppContext { config, repo, registry, metrics, logs, transport })
    }
}

/// Restores the metrics snapshot and log buffer persisted by the previous
/// run. Missing or unreadable snapshots leave the fresh state in place.
pub async fn restore_snapshots<S: KeyValueStore + ?Sized>(
    repo: &S,
    metrics: &AppMetrics,
    logs: &LogBuffer,
) {
    match repo.get_json_state::<MetricsSnapshot>(METRICS_SNAPSHOT_KEY).await {
        Ok(Some(snapshot)) => {
            tracing::debug!(total_sent = snapshot.total_sent, "Restoring metrics snapshot.");
            metrics.restore(snapshot).await;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load metrics snapshot."),
    }

    match repo.get_json_state::<Vec<LogEntry>>(LOG_BUFFER_KEY).await {
        Ok(Some(entries)) => logs.restore(entries),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to load log buffer."),
    }
}
