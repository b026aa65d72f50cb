//! HTTP server module: the subscription API used by web clients plus the
//! authenticated administrative endpoints.

mod auth;
mod error;
mod health;
mod notify;
mod subscriptions;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware,
    routing::{get, post},
};
pub use error::ApiError;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, engine::AppPipeline};

/// Shared state of every handler.
#[derive(Clone)]
pub struct ApiState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// The pipeline, for registry, queue and observability access.
    pub pipeline: Arc<AppPipeline>,
}

/// Builds the router. Routes that expose or trigger notifications for
/// arbitrary subscribers require the bearer credential.
pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/subscriptions", get(subscriptions::get_subscriptions))
        .route("/notify", post(notify::notify))
        .route("/metrics", get(health::metrics))
        .route("/logs", get(health::logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth));

    Router::new()
        .route("/health", get(health::health))
        .route("/subscribe", post(subscriptions::subscribe))
        .route("/unsubscribe", post(subscriptions::unsubscribe))
        .route("/preferences", post(subscriptions::update_preferences))
        .route("/subscription/check", post(subscriptions::check_subscription))
        .route("/test-notification", post(notify::test_notification))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the HTTP server until `shutdown` is cancelled.
pub async fn run_server_from_config(
    config: Arc<AppConfig>,
    pipeline: Arc<AppPipeline>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr: SocketAddr = config.server.listen_address.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid server.listen_address '{}': {e}", config.server.listen_address),
        )
    })?;

    let app = router(ApiState { config, pipeline });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "HTTP server listening.");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
