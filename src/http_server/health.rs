//! Liveness, metrics and log endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ApiError, ApiState};
use crate::context::{LogLevel, MAX_LOG_ENTRIES, MetricsSnapshot};

const DEFAULT_LOG_LIMIT: usize = 100;

/// Represents the response from the `/health` endpoint.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "ok" when the server answers.
    pub status: &'static str,
    /// Registered subscribers.
    pub subscribers: u64,
    /// Groups with at least one member.
    pub groups: u64,
    /// Keywords with at least one subscriber.
    pub keywords: u64,
    /// Items waiting in the delivery queue.
    pub queue_depth: u64,
}

/// Represents the response from the `/metrics` endpoint.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    /// The version of the application.
    pub version: &'static str,
    /// The uptime of the application in seconds.
    pub uptime_secs: u64,
    /// Raw counters.
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    /// Percentage of attempts accepted by the push service.
    pub success_rate: f64,
    /// Most frequent failure reasons.
    pub top_errors: Vec<(String, u64)>,
}

/// Query string of `/logs`.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Only entries of exactly this level.
    pub level: Option<String>,
    /// Maximum number of entries.
    pub limit: Option<usize>,
}

/// Liveness plus registry and queue sizes.
pub async fn health(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.pipeline.registry().counts().await?;
    let queue_depth = state.pipeline.queue().depth().await?;
    let response = HealthResponse {
        status: "ok",
        subscribers: counts.subscribers,
        groups: counts.groups,
        keywords: counts.keywords,
        queue_depth,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// Delivery and pipeline counters.
pub async fn metrics(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let metrics = state.pipeline.metrics();
    let response = MetricsResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: metrics.uptime_secs().await,
        snapshot: metrics.snapshot().await,
        success_rate: metrics.success_rate().await,
        top_errors: metrics.top_errors(5).await,
    };
    Ok((StatusCode::OK, Json(response)))
}

/// Recent log entries, newest last.
pub async fn logs(
    State(state): State<ApiState>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let level = query
        .level
        .as_deref()
        .map(str::parse::<LogLevel>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_ENTRIES);

    let entries = state.pipeline.logs().get_logs(level, limit);
    Ok((StatusCode::OK, Json(json!({ "logs": entries }))))
}
