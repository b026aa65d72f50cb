//! Delivery queue items, payloads and pending aggregation windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trigger::NotificationTrigger;

/// What the browser's service worker receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub body: String,
    /// Structured data for the client (event ids, group, link).
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A durable, retryable delivery of one payload to one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Unique item id.
    pub id: String,
    /// Recipient.
    pub subscriber_id: String,
    /// Payload to push.
    pub payload: NotificationPayload,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Earliest time of the next attempt.
    pub next_attempt_at: DateTime<Utc>,
    /// Last transient error, if any.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Creates a fresh item due immediately.
    pub fn new(subscriber_id: &str, payload: NotificationPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.to_string(),
            payload,
            attempts: 0,
            created_at: now,
            next_attempt_at: now,
            last_error: None,
        }
    }

    /// Whether the item may be attempted at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}

/// Triggers accumulated for a subscriber with hourly or daily frequency.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotifications {
    /// Recipient.
    pub subscriber_id: String,
    /// Accumulated triggers, oldest first.
    pub triggers: Vec<NotificationTrigger>,
    /// When the first trigger of the window arrived.
    pub window_started_at: Option<DateTime<Utc>>,
}
