//! The Supervisor module manages the lifecycle of the Herald service.
//!
//! The supervisor owns the pipeline and the HTTP server and drives the
//! recurring tick.
//!
//! ## Responsibilities
//!
//! - **Initialization**: The `SupervisorBuilder` wires the pipeline stages
//!   together over one state repository.
//! - **Scheduling**: A tick runs every `tick_interval`. Ticks run on their
//!   own tasks; one that is still running when the next is due makes the
//!   next one skip.
//! - **Graceful Shutdown**: It listens for Ctrl+C and SIGTERM, lets the
//!   in-flight tick finish, persists the metrics and log snapshots and
//!   checkpoints the database within `shutdown_timeout`.
//! - **Task Supervision**: If a supervised task panics, every other task is
//!   shut down so the process exits instead of running half-functional.

mod builder;

use std::sync::Arc;

pub use builder::SupervisorBuilder;
use chrono::Utc;
use thiserror::Error;
use tokio::{signal, task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    engine::{AppPipeline, PipelineError, TickReport},
    http_server,
    persistence::SqliteStateRepository,
};

/// Represents the set of errors that can occur during the supervisor's
/// operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required configuration was not provided to the `SupervisorBuilder`.
    #[error("Missing configuration for Supervisor")]
    MissingConfig,

    /// A state repository was not provided to the `SupervisorBuilder`.
    #[error("Missing state repository for Supervisor")]
    MissingStateRepository,

    /// A relay source was not provided to the `SupervisorBuilder`.
    #[error("Missing relay source for Supervisor")]
    MissingRelaySource,

    /// A push transport was not provided to the `SupervisorBuilder`.
    #[error("Missing push transport for Supervisor")]
    MissingPushTransport,

    /// A pipeline tick failed.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// The primary runtime manager for the application.
pub struct Supervisor {
    /// Shared application configuration.
    config: Arc<AppConfig>,

    /// The persistent state repository.
    state: Arc<SqliteStateRepository>,

    /// The notification pipeline.
    pipeline: Arc<AppPipeline>,

    /// A token used to signal a graceful shutdown to all supervised tasks.
    cancellation_token: CancellationToken,

    /// A set of all spawned tasks that the supervisor is actively managing.
    join_set: JoinSet<()>,
}

impl Supervisor {
    /// Creates a new Supervisor instance with all its required components.
    pub fn new(
        config: AppConfig,
        state: Arc<SqliteStateRepository>,
        pipeline: Arc<AppPipeline>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            state,
            pipeline,
            cancellation_token: CancellationToken::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Returns a new `SupervisorBuilder` instance.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// The pipeline driven by this supervisor.
    pub fn pipeline(&self) -> &Arc<AppPipeline> {
        &self.pipeline
    }

    /// Token that stops [`Supervisor::run`] when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Runs exactly one tick, for external schedulers, then cleans up.
    pub async fn run_once(self) -> Result<Option<TickReport>, SupervisorError> {
        let report = self.pipeline.run_tick(Utc::now()).await;
        self.cleanup().await;
        Ok(report?)
    }

    /// Starts the tick loop and the HTTP server and blocks until shutdown.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let cancellation_token = self.cancellation_token.clone();
        self.join_set.spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {},
                _ = cancellation_token.cancelled() => return,
            }
            cancellation_token.cancel();
        });

        if self.config.server.enabled {
            let config = Arc::clone(&self.config);
            let pipeline = Arc::clone(&self.pipeline);
            let token = self.cancellation_token.clone();
            self.join_set.spawn(async move {
                if let Err(e) =
                    http_server::run_server_from_config(config, pipeline, token.clone()).await
                {
                    tracing::error!(error = %e, "HTTP server failed. Initiating shutdown.");
                    token.cancel();
                }
            });
        }

        let pipeline = Arc::clone(&self.pipeline);
        let token = self.cancellation_token.clone();
        let tick_interval = self.config.tick_interval;
        self.join_set.spawn(async move {
            run_tick_loop(pipeline, tick_interval, token).await;
        });

        loop {
            tokio::select! {
                maybe_result = self.join_set.join_next() => {
                    match maybe_result {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            tracing::error!(error = ?e, "A critical task failed. Initiating shutdown.");
                            self.cancellation_token.cancel();
                        }
                        None => break,
                    }
                }
                _ = self.cancellation_token.cancelled() => break,
            }
        }

        // Let the tick loop and the server wind down on the cancelled token.
        while let Some(result) = self.join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = ?e, "Task failed during shutdown.");
            }
        }
        tracing::info!("All supervised tasks have completed.");

        self.cleanup().await;
        tracing::info!("Supervisor shutdown complete.");
        Ok(())
    }

    async fn cleanup(&self) {
        tracing::info!("Starting graceful resource cleanup...");
        let shutdown_timeout = self.config.shutdown_timeout;

        let cleanup_logic = async {
            self.pipeline.persist_snapshots().await;

            if let Err(e) = self.state.flush().await {
                tracing::error!(error = %e, "Failed to flush pending writes, but continuing cleanup.");
            }
            if let Err(e) = self.state.cleanup().await {
                tracing::error!(error = %e, "Failed to perform state repository cleanup, but continuing.");
            }
            match self.pipeline.queue().depth().await {
                Ok(depth) => tracing::info!(queue_depth = depth, "Final state recorded."),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not retrieve final state during cleanup.")
                }
            }
        };

        if tokio::time::timeout(shutdown_timeout, cleanup_logic).await.is_err() {
            tracing::warn!(
                timeout = ?shutdown_timeout,
                "Cleanup did not complete within the timeout. Continuing shutdown."
            );
        } else {
            tracing::info!("Cleanup completed successfully.");
        }
        self.state.close().await;
    }
}

async fn run_tick_loop(
    pipeline: Arc<AppPipeline>,
    tick_interval: std::time::Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                let pipeline = Arc::clone(&pipeline);
                in_flight.spawn(async move {
                    if let Err(e) = pipeline.run_tick(Utc::now()).await {
                        tracing::error!(error = %e, "Tick failed.");
                    }
                });
            }
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = ?e, "Tick task panicked.");
                }
            }
        }
    }

    if !in_flight.is_empty() {
        tracing::info!("Waiting for the in-flight tick to finish.");
    }
    while in_flight.join_next().await.is_some() {}
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler.");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT (Ctrl+C) received, initiating graceful shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown."),
    }
}
