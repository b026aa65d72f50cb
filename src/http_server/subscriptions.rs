//! Handlers for subscription management.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiState};
use crate::{models::PreferencesUpdate, registry::SubscriptionRequest};

/// Body of `/unsubscribe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    /// Subscriber to remove.
    pub subscriber_id: String,
}

/// Body of `/preferences`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    /// Subscriber to update.
    pub subscriber_id: String,
    /// Fields to change; omitted fields keep their value.
    #[serde(default)]
    pub preferences: PreferencesUpdate,
}

/// Body of `/subscription/check`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// Subscriber to look up.
    pub subscriber_id: String,
    /// Endpoint the browser currently holds.
    pub endpoint: String,
}

/// Creates or replaces a subscription.
pub async fn subscribe(
    State(state): State<ApiState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.pipeline.registry().subscribe(request).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true, "subscriberId": record.subscriber_id }))))
}

/// Removes a subscription and everything attached to it.
pub async fn unsubscribe(
    State(state): State<ApiState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.pipeline.registry().unsubscribe(&request.subscriber_id).await?;
    Ok((StatusCode::OK, Json(json!({ "success": removed }))))
}

/// Applies a partial preference update.
pub async fn update_preferences(
    State(state): State<ApiState>,
    Json(request): Json<PreferencesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.pipeline.registry().update_preferences(&request.subscriber_id, &request.preferences).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

/// Lists every subscriber with its groups.
pub async fn get_subscriptions(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let overview = state.pipeline.registry().subscriptions_overview().await?;
    Ok((StatusCode::OK, Json(overview)))
}

/// Tells the browser whether its subscription is still registered.
pub async fn check_subscription(
    State(state): State<ApiState>,
    Json(request): Json<CheckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let valid =
        state.pipeline.registry().check_subscription(&request.subscriber_id, &request.endpoint).await?;
    let status = if valid { StatusCode::OK } else { StatusCode::NOT_FOUND };
    Ok((status, Json(json!({ "valid": valid }))))
}
