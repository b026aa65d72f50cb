//! This module provides the `SupervisorBuilder` for constructing a `Supervisor`.

use std::sync::Arc;

use super::{Supervisor, SupervisorError};
use crate::{
    config::AppConfig,
    context::{AppContext, AppMetrics, LogBuffer},
    engine::Pipeline,
    persistence::SqliteStateRepository,
    push::PushTransport,
    registry::SubscriberRegistry,
    relay::RelaySource,
};

/// A builder for creating a `Supervisor` instance.
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<AppConfig>,
    state: Option<Arc<SqliteStateRepository>>,
    registry: Option<Arc<SubscriberRegistry<SqliteStateRepository>>>,
    relay_source: Option<Arc<dyn RelaySource>>,
    push_transport: Option<Arc<dyn PushTransport>>,
    metrics: AppMetrics,
    logs: LogBuffer,
}

impl SupervisorBuilder {
    /// Creates a new, empty `SupervisorBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes configuration, repository, registry, metrics, logs and push
    /// transport from an initialized context.
    pub fn context(self, context: AppContext<SqliteStateRepository>) -> Self {
        let transport: Arc<dyn PushTransport> = context.transport;
        Self {
            config: Some(context.config),
            state: Some(context.repo),
            registry: Some(context.registry),
            push_transport: Some(transport),
            metrics: context.metrics,
            logs: context.logs,
            ..self
        }
    }

    /// Sets the application configuration for the `Supervisor`.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the state repository (database connection) for the `Supervisor`.
    pub fn state(mut self, state: Arc<SqliteStateRepository>) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the relay source the monitor polls.
    pub fn relay_source(mut self, relay_source: Arc<dyn RelaySource>) -> Self {
        self.relay_source = Some(relay_source);
        self
    }

    /// Sets the push transport used by the delivery queue.
    pub fn push_transport(mut self, push_transport: Arc<dyn PushTransport>) -> Self {
        self.push_transport = Some(push_transport);
        self
    }

    /// Assembles and validates the components to build a `Supervisor`.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        let config = self.config.ok_or(SupervisorError::MissingConfig)?;
        let state = self.state.ok_or(SupervisorError::MissingStateRepository)?;
        let relay_source = self.relay_source.ok_or(SupervisorError::MissingRelaySource)?;
        let push_transport = self.push_transport.ok_or(SupervisorError::MissingPushTransport)?;
        let registry =
            self.registry.unwrap_or_else(|| Arc::new(SubscriberRegistry::new(Arc::clone(&state))));

        tracing::debug!(relays = config.relays.len(), "Wiring notification pipeline.");
        let pipeline = Arc::new(Pipeline::new(
            &config,
            Arc::clone(&state),
            registry,
            relay_source,
            push_transport,
            self.metrics,
            self.logs,
        ));

        Ok(Supervisor::new(config, state, pipeline))
    }
}
