//! Implementation of the EventStore trait for SqliteStateRepository.
//!
//! Watermarks and processed markers live in the same key-value table as every
//! other piece of state. Their writes are conditional upserts so concurrent
//! writers cannot lower a watermark or both claim one event.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::persistence::{
    error::PersistenceError,
    keys::{PROCESSED_PREFIX, processed_key, watermark_key},
    sqlite::SqliteStateRepository,
    traits::{EventStore, KeyValueStore},
};

/// Marker recording that an event already produced its triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEventMarker {
    /// The processed event.
    pub event_id: String,
    /// Unix time (seconds) after which the marker is ignored and swept.
    pub expires_at: i64,
}

#[async_trait]
impl EventStore for SqliteStateRepository {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_watermark(&self, relay: &str) -> Result<Option<u64>, PersistenceError> {
        self.get_json_state::<u64>(&watermark_key(relay)).await
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn advance_watermark(
        &self,
        relay: &str,
        timestamp: u64,
    ) -> Result<bool, PersistenceError> {
        let result = self
            .execute_query_with_error_handling(
                "advance watermark",
                sqlx::query(
                    "INSERT INTO application_state (key, value, updated_at) \
                     VALUES (?, ?, CURRENT_TIMESTAMP) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     updated_at = CURRENT_TIMESTAMP \
                     WHERE CAST(application_state.value AS INTEGER) < CAST(excluded.value AS INTEGER)",
                )
                .bind(watermark_key(relay))
                .bind(timestamp.to_string())
                .execute(&self.pool),
            )
            .await?;

        let advanced = result.rows_affected() > 0;
        if advanced {
            tracing::debug!(relay, timestamp, "Watermark advanced.");
        } else {
            tracing::debug!(relay, timestamp, "Watermark unchanged (not newer than current).");
        }
        Ok(advanced)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn has_processed(&self, event_id: &str) -> Result<bool, PersistenceError> {
        let marker = self.get_json_state::<ProcessedEventMarker>(&processed_key(event_id)).await?;
        Ok(marker.is_some_and(|m| m.expires_at > Utc::now().timestamp()))
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn mark_processed(&self, event_id: &str, ttl: Duration) -> Result<bool, PersistenceError> {
        let now = Utc::now().timestamp();
        let marker = ProcessedEventMarker {
            event_id: event_id.to_string(),
            expires_at: now.saturating_add(ttl.as_secs() as i64),
        };
        let value = serde_json::to_string(&marker)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;

        let result = self
            .execute_query_with_error_handling(
                "mark event processed",
                sqlx::query(
                    "INSERT INTO application_state (key, value, updated_at) \
                     VALUES (?, ?, CURRENT_TIMESTAMP) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     updated_at = CURRENT_TIMESTAMP \
                     WHERE CAST(json_extract(application_state.value, '$.expiresAt') AS INTEGER) <= ?",
                )
                .bind(processed_key(event_id))
                .bind(value)
                .bind(now)
                .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn purge_expired_markers(&self) -> Result<u64, PersistenceError> {
        let result = self
            .execute_query_with_error_handling(
                "purge expired markers",
                sqlx::query(
                    "DELETE FROM application_state WHERE substr(key, 1, ?) = ? \
                     AND CAST(json_extract(value, '$.expiresAt') AS INTEGER) <= ?",
                )
                .bind(PROCESSED_PREFIX.len() as i64)
                .bind(PROCESSED_PREFIX)
                .bind(Utc::now().timestamp())
                .execute(&self.pool),
            )
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired processed-event markers.");
        }
        Ok(purged)
    }
}
