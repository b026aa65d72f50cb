//! Handlers that push notifications outside the relay polling cycle.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, ApiState};
use crate::{
    engine::extractor::excerpt,
    models::{NotificationPayload, NotificationTrigger, Priority, TriggerType},
};

/// A synthetic trigger submitted to `/notify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticNotification {
    /// Trigger category; governs the preference gate and the title.
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Delivery urgency.
    #[serde(default)]
    pub priority: Priority,
    /// Event the notification refers to, if any.
    #[serde(default)]
    pub event_id: Option<String>,
    /// Group the notification refers to, if any.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Keyword, for keyword triggers.
    #[serde(default)]
    pub keyword: Option<String>,
    /// Who caused the notification.
    #[serde(default)]
    pub author: String,
    /// Body text.
    #[serde(default)]
    pub content: String,
}

/// Body of `/notify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// Recipient.
    pub subscriber_id: String,
    /// The trigger to run through the gates.
    pub notification: SyntheticNotification,
}

/// Body of `/test-notification`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNotificationRequest {
    /// Recipient.
    pub subscriber_id: String,
    /// Optional body text.
    #[serde(default)]
    pub message: Option<String>,
}

/// Runs one synthetic trigger through the gates, enqueues it and drains the
/// queue. Answers 204 when a gate filtered it out.
pub async fn notify(
    State(state): State<ApiState>,
    Json(request): Json<NotifyRequest>,
) -> Result<Response, ApiError> {
    let registry = state.pipeline.registry();
    let record = registry
        .get(&request.subscriber_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Subscriber not found".to_string()))?;

    let now = Utc::now();
    let notification = request.notification;
    let trigger = NotificationTrigger {
        source_event_id: notification
            .event_id
            .unwrap_or_else(|| format!("notify-{}", uuid::Uuid::new_v4().simple())),
        trigger_type: notification.trigger_type,
        priority: notification.priority,
        target_subscriber_ids: vec![record.subscriber_id.clone()],
        group_id: notification.group_id,
        keyword: notification.keyword,
        author: notification.author,
        excerpt: excerpt(&notification.content, state.config.notifications.excerpt_length),
        timestamp: now,
    };

    let report = state.pipeline.dispatch(&[trigger], now).await?;
    if report.enqueued == 0 && report.deferred == 0 {
        tracing::debug!(subscriber_id = %record.subscriber_id, "Synthetic notification filtered out.");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    if report.enqueued > 0 {
        // Failed items stay queued for the tick's retry sweep.
        if let Err(e) = state.pipeline.queue().drain(now).await {
            tracing::warn!(subscriber_id = %record.subscriber_id, error = %e, "Drain after /notify failed.");
        }
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true, "queued": report.enqueued })))
        .into_response())
}

/// Sends an immediate, unaggregated test payload and reports the push
/// service's answer.
pub async fn test_notification(
    State(state): State<ApiState>,
    Json(request): Json<TestNotificationRequest>,
) -> Result<Response, ApiError> {
    let payload = NotificationPayload {
        title: "Test notification".to_string(),
        body: request
            .message
            .unwrap_or_else(|| "Push notifications are working.".to_string()),
        data: json!({ "type": "test", "url": state.config.notifications.app_url }),
    };

    let response = match state.pipeline.queue().send_now(&request.subscriber_id, &payload).await? {
        Ok(status) => (StatusCode::OK, Json(json!({ "success": true, "statusCode": status }))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "success": false,
                "statusCode": e.status_code(),
                "error": e.to_string(),
            })),
        ),
    };
    Ok(response.into_response())
}
