//! Durable delivery queue with bounded retries.
//!
//! Items live under `queue:<id>` and are revisited on every drain once their
//! `next_attempt_at` has passed. Items of one subscriber are sent one after
//! the other under a per-subscriber lock; distinct subscribers are drained
//! concurrently.

mod error;

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
pub use error::DeliveryError;
use futures::{StreamExt, stream};

use crate::{
    config::DeliveryConfig,
    context::AppMetrics,
    locks::KeyedLocks,
    models::{NotificationPayload, QueueItem, SubscriberRecord},
    persistence::{
        keys::{QUEUE_PREFIX, queue_key},
        traits::KeyValueStore,
    },
    push::{PushError, PushSubscription, PushTransport},
    registry::SubscriberRegistry,
};

/// What one drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Send attempts made.
    pub attempted: usize,
    /// Items delivered and removed.
    pub delivered: usize,
    /// Items rescheduled after a transient failure.
    pub retried: usize,
    /// Items abandoned after the last allowed attempt.
    pub dead_lettered: usize,
    /// Subscriptions removed because the push service rejected them.
    pub invalid_subscriptions: usize,
    /// Items removed without an attempt because their subscriber is gone.
    pub dropped: usize,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.invalid_subscriptions += other.invalid_subscriptions;
        self.dropped += other.dropped;
    }
}

/// The delivery queue.
pub struct DeliveryQueue<S: KeyValueStore + ?Sized, P: PushTransport + ?Sized> {
    state_repository: Arc<S>,
    registry: Arc<SubscriberRegistry<S>>,
    transport: Arc<P>,
    config: DeliveryConfig,
    metrics: AppMetrics,
    subscriber_locks: KeyedLocks,
}

impl<S: KeyValueStore + ?Sized, P: PushTransport + ?Sized> DeliveryQueue<S, P> {
    /// Creates a queue.
    pub fn new(
        state_repository: Arc<S>,
        registry: Arc<SubscriberRegistry<S>>,
        transport: Arc<P>,
        config: DeliveryConfig,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            state_repository,
            registry,
            transport,
            config,
            metrics,
            subscriber_locks: KeyedLocks::new(),
        }
    }

    /// Number of subscribers currently being sent to.
    pub fn lock_count(&self) -> usize {
        self.subscriber_locks.len()
    }

    /// Persists a new item, due immediately.
    pub async fn enqueue(
        &self,
        subscriber_id: &str,
        payload: NotificationPayload,
        now: DateTime<Utc>,
    ) -> Result<QueueItem, DeliveryError> {
        let item = QueueItem::new(subscriber_id, payload, now);
        self.state_repository.set_json_state(&queue_key(&item.id), &item).await?;
        tracing::debug!(subscriber_id, item_id = %item.id, "Notification enqueued.");
        Ok(item)
    }

    /// Number of items in the queue.
    pub async fn depth(&self) -> Result<u64, DeliveryError> {
        Ok(self.state_repository.count_by_prefix(QUEUE_PREFIX).await?)
    }

    /// All queued items, ordered by id.
    pub async fn items(&self) -> Result<Vec<QueueItem>, DeliveryError> {
        let items =
            self.state_repository.get_all_json_states_by_prefix::<QueueItem>(QUEUE_PREFIX).await?;
        Ok(items.into_iter().map(|(_, item)| item).collect())
    }

    /// Attempts every item due at `now`.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport, DeliveryError> {
        let mut by_subscriber: BTreeMap<String, Vec<QueueItem>> = BTreeMap::new();
        for item in self.items().await? {
            if item.is_due(now) {
                by_subscriber.entry(item.subscriber_id.clone()).or_default().push(item);
            }
        }
        if by_subscriber.is_empty() {
            return Ok(DrainReport::default());
        }

        let concurrency = self.config.concurrency.max(1);
        let reports: Vec<DrainReport> = stream::iter(by_subscriber)
            .map(|(subscriber_id, mut items)| async move {
                items.sort_by_key(|item| item.created_at);
                self.drain_subscriber(&subscriber_id, items, now).await
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = DrainReport::default();
        for r in reports {
            report.merge(r);
        }
        if report.attempted > 0 || report.dropped > 0 {
            tracing::info!(
                attempted = report.attempted,
                delivered = report.delivered,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                invalid_subscriptions = report.invalid_subscriptions,
                dropped = report.dropped,
                "Delivery queue drained."
            );
        }
        Ok(report)
    }

    async fn drain_subscriber(
        &self,
        subscriber_id: &str,
        items: Vec<QueueItem>,
        now: DateTime<Utc>,
    ) -> DrainReport {
        let _guard = self.subscriber_locks.lock(subscriber_id).await;
        let mut report = DrainReport::default();

        let record = match self.registry.get(subscriber_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                for item in &items {
                    if self.remove_item(item).await {
                        report.dropped += 1;
                    }
                }
                tracing::info!(subscriber_id, dropped = report.dropped, "Dropped items of a removed subscriber.");
                return report;
            }
            Err(e) => {
                tracing::error!(subscriber_id, error = %e, "Failed to load subscriber, items left for the next drain.");
                return report;
            }
        };

        let mut remaining = items.into_iter();
        while let Some(item) = remaining.next() {
            // A concurrent drain may have sent or rescheduled the item.
            let current = match self.state_repository.get_json_state::<QueueItem>(&queue_key(&item.id)).await {
                Ok(Some(current)) if current.is_due(now) => current,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(subscriber_id, item_id = %item.id, error = %e, "Failed to re-read queue item.");
                    continue;
                }
            };

            report.attempted += 1;
            match self.send(&record, &current.payload).await {
                Ok(_) => {
                    if self.remove_item(&current).await {
                        report.delivered += 1;
                    }
                }
                Err(e) if e.is_invalid_subscription() => {
                    report.invalid_subscriptions += 1;
                    self.remove_item(&current).await;
                    for rest in remaining.by_ref() {
                        if self.remove_item(&rest).await {
                            report.dropped += 1;
                        }
                    }
                    self.remove_subscriber(subscriber_id, &e).await;
                    break;
                }
                Err(e) => {
                    if self.reschedule(current, &e, now).await {
                        report.retried += 1;
                    } else {
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        report
    }

    /// Sends one payload and records the outcome in the metrics.
    async fn send(
        &self,
        record: &SubscriberRecord,
        payload: &NotificationPayload,
    ) -> Result<u16, PushError> {
        let started = tokio::time::Instant::now();
        let result = self.transport.send(&PushSubscription::from(record), payload).await;
        match &result {
            Ok(status) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.metrics.record_success(elapsed).await;
                tracing::debug!(subscriber_id = %record.subscriber_id, status, elapsed_ms = elapsed, "Push delivered.");
            }
            Err(e) if e.is_invalid_subscription() => {
                self.metrics.record_invalid_subscription().await;
            }
            Err(e) => {
                self.metrics.record_failure(&e.reason()).await;
            }
        }
        result
    }

    /// Records a failure that leaves the subscription valid. Returns false
    /// if the item was dead-lettered instead of rescheduled. Failures that
    /// cannot change between attempts are dead-lettered right away.
    async fn reschedule(&self, mut item: QueueItem, error: &PushError, now: DateTime<Utc>) -> bool {
        item.attempts += 1;
        item.last_error = Some(error.to_string());

        if !error.is_retryable() || item.attempts >= self.config.max_attempts {
            tracing::warn!(
                subscriber_id = %item.subscriber_id,
                item_id = %item.id,
                attempts = item.attempts,
                error = %error,
                "Delivery abandoned after the last attempt (dead-letter)."
            );
            self.remove_item(&item).await;
            return false;
        }

        let backoff = self.config.backoff_for(item.attempts);
        item.next_attempt_at = now + chrono::Duration::milliseconds(backoff.as_millis() as i64);
        tracing::info!(
            subscriber_id = %item.subscriber_id,
            item_id = %item.id,
            attempts = item.attempts,
            next_attempt_at = %item.next_attempt_at,
            error = %error,
            "Delivery failed, retry scheduled."
        );
        if let Err(e) = self.state_repository.set_json_state(&queue_key(&item.id), &item).await {
            tracing::error!(item_id = %item.id, error = %e, "Failed to persist rescheduled queue item.");
        }
        true
    }

    async fn remove_item(&self, item: &QueueItem) -> bool {
        match self.state_repository.delete_json_state(&queue_key(&item.id)).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "Failed to delete queue item.");
                false
            }
        }
    }

    async fn remove_subscriber(&self, subscriber_id: &str, reason: &PushError) {
        tracing::warn!(subscriber_id, error = %reason, "Push subscription rejected, removing subscriber.");
        if let Err(e) = self.registry.unsubscribe(subscriber_id).await {
            tracing::error!(subscriber_id, error = %e, "Failed to remove invalid subscriber.");
        }
    }

    /// Sends `payload` once, bypassing the queue. An invalid subscription is
    /// removed exactly as during a drain.
    pub async fn send_now(
        &self,
        subscriber_id: &str,
        payload: &NotificationPayload,
    ) -> Result<Result<u16, PushError>, DeliveryError> {
        let record = self
            .registry
            .get(subscriber_id)
            .await?
            .ok_or_else(|| DeliveryError::UnknownSubscriber(subscriber_id.to_string()))?;

        let _guard = self.subscriber_locks.lock(&record.subscriber_id).await;

        let result = self.send(&record, payload).await;
        if let Err(e) = &result {
            if e.is_invalid_subscription() {
                self.remove_subscriber(&record.subscriber_id, e).await;
            } else {
                tracing::warn!(subscriber_id = %record.subscriber_id, error = %e, "Immediate push failed.");
            }
        }
        Ok(result)
    }
}
