//! Storage interfaces used by the pipeline stages.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Serialize, de::DeserializeOwned};

use super::error::PersistenceError;

/// Generic JSON state storage over string keys.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieves a JSON-serializable state object by its key.
    async fn get_json_state<T: DeserializeOwned + Send + Sync + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PersistenceError>;

    /// Sets or updates a JSON-serializable state object by its key.
    async fn set_json_state<T: Serialize + Send + Sync + 'static>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), PersistenceError>;

    /// Deletes a state object. Returns true if something was deleted.
    async fn delete_json_state(&self, key: &str) -> Result<bool, PersistenceError>;

    /// Retrieves every state object whose key starts with `prefix`, ordered
    /// by key. Entries that fail to decode are skipped and logged.
    async fn get_all_json_states_by_prefix<T: DeserializeOwned + Send + Sync + 'static>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>, PersistenceError>;

    /// Counts the keys starting with `prefix`.
    async fn count_by_prefix(&self, prefix: &str) -> Result<u64, PersistenceError>;
}

/// Relay watermarks and processed-event markers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns the watermark of a relay, if one was ever committed.
    async fn get_watermark(&self, relay: &str) -> Result<Option<u64>, PersistenceError>;

    /// Raises the watermark of a relay. A value at or below the current one
    /// is a no-op; returns whether the stored value changed.
    async fn advance_watermark(&self, relay: &str, timestamp: u64)
    -> Result<bool, PersistenceError>;

    /// Returns true if an unexpired marker exists for the event.
    async fn has_processed(&self, event_id: &str) -> Result<bool, PersistenceError>;

    /// Atomically claims an event for processing by writing a marker that
    /// expires after `ttl`. Returns false if an unexpired marker already
    /// exists, in which case the caller must not produce triggers.
    async fn mark_processed(&self, event_id: &str, ttl: Duration)
    -> Result<bool, PersistenceError>;

    /// Deletes expired markers, returning how many were removed.
    async fn purge_expired_markers(&self) -> Result<u64, PersistenceError>;
}

/// Everything the pipeline needs from its backing store.
pub trait AppRepository: KeyValueStore + EventStore + 'static {}

impl<T: KeyValueStore + EventStore + 'static> AppRepository for T {}
