//! One tick of the notification pipeline: poll, extract, gate, enqueue,
//! drain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    aggregator::{AggregationOutcome, Aggregator, ReadyNotification},
    error::PipelineError,
    extractor::{Extraction, TriggerExtractor},
};
use crate::{
    config::{AppConfig, NotificationPolicyConfig},
    context::{AppMetrics, LogBuffer},
    delivery::{DeliveryQueue, DrainReport},
    models::{Event, NotificationTrigger},
    persistence::{
        SqliteStateRepository,
        keys::{LOG_BUFFER_KEY, METRICS_SNAPSHOT_KEY},
        traits::AppRepository,
    },
    push::PushTransport,
    registry::SubscriberRegistry,
    relay::{RelayMonitor, RelayPollOutcome, RelaySource},
};

/// Counters of the extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Events claimed and classified.
    pub processed: usize,
    /// Events dropped by id or signature verification.
    pub invalid: usize,
    /// Events skipped because a marker already existed.
    pub duplicates: usize,
    /// Events whose processing failed on storage.
    pub failed: usize,
}

/// What the gating and enqueueing stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Queue items created.
    pub enqueued: usize,
    /// Recipients whose triggers were parked in a pending window.
    pub deferred: usize,
    /// Trigger/recipient pairs removed by a gate.
    pub filtered: usize,
}

/// Summary of one complete tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Per-relay poll outcomes.
    pub relays: Vec<RelayPollOutcome>,
    /// Unique events fetched this tick.
    pub events_fetched: usize,
    /// Extraction counters.
    pub extraction: ExtractionReport,
    /// Triggers produced by extraction.
    pub triggers: usize,
    /// Gating and enqueueing counters, including flushed windows.
    pub dispatch: DispatchReport,
    /// Queue drain counters.
    pub drain: DrainReport,
}

/// The pipeline as the binary runs it: SQLite state behind trait-object
/// relay and push seams.
pub type AppPipeline = Pipeline<SqliteStateRepository, dyn RelaySource, dyn PushTransport>;

/// Wires the pipeline stages over one repository.
pub struct Pipeline<S, R, P>
where
    S: AppRepository + ?Sized,
    R: RelaySource + ?Sized,
    P: PushTransport + ?Sized,
{
    state_repository: Arc<S>,
    registry: Arc<SubscriberRegistry<S>>,
    monitor: RelayMonitor<S, R>,
    extractor: TriggerExtractor<S>,
    aggregator: Aggregator<S>,
    queue: Arc<DeliveryQueue<S, P>>,
    policy: NotificationPolicyConfig,
    metrics: AppMetrics,
    logs: LogBuffer,
    tick_guard: Mutex<()>,
    dispatch_lock: Mutex<()>,
}

impl<S, R, P> Pipeline<S, R, P>
where
    S: AppRepository + ?Sized,
    R: RelaySource + ?Sized,
    P: PushTransport + ?Sized,
{
    /// Builds the pipeline described by `config`.
    pub fn new(
        config: &AppConfig,
        state_repository: Arc<S>,
        registry: Arc<SubscriberRegistry<S>>,
        source: Arc<R>,
        transport: Arc<P>,
        metrics: AppMetrics,
        logs: LogBuffer,
    ) -> Self {
        let monitor = RelayMonitor::new(
            state_repository.clone(),
            source,
            config.relays.clone(),
            config.watched_kinds.clone(),
            config.relay_fetch_limit,
            config.initial_lookback,
        );
        let extractor = TriggerExtractor::new(
            state_repository.clone(),
            registry.clone(),
            config.notifications.clone(),
            config.processed_event_ttl,
        );
        let aggregator =
            Aggregator::new(state_repository.clone(), registry.clone(), config.notifications.clone());
        let queue = Arc::new(DeliveryQueue::new(
            state_repository.clone(),
            registry.clone(),
            transport,
            config.delivery.clone(),
            metrics.clone(),
        ));

        Self {
            state_repository,
            registry,
            monitor,
            extractor,
            aggregator,
            queue,
            policy: config.notifications.clone(),
            metrics,
            logs,
            tick_guard: Mutex::new(()),
            dispatch_lock: Mutex::new(()),
        }
    }

    /// The subscriber registry.
    pub fn registry(&self) -> &Arc<SubscriberRegistry<S>> {
        &self.registry
    }

    /// The delivery queue.
    pub fn queue(&self) -> &Arc<DeliveryQueue<S, P>> {
        &self.queue
    }

    /// Shared metrics.
    pub fn metrics(&self) -> &AppMetrics {
        &self.metrics
    }

    /// The in-memory log buffer.
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Runs one full tick. Returns `None` without doing anything when
    /// another tick is still in progress.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<Option<TickReport>, PipelineError> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            tracing::warn!("Previous tick still running, skipping this one.");
            return Ok(None);
        };

        match self.state_repository.purge_expired_markers().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Expired processed-event markers removed."),
            Err(e) => tracing::error!(error = %e, "Failed to purge processed-event markers."),
        }

        let poll = self.monitor.poll(now.timestamp().max(0) as u64).await;
        let mut report = TickReport {
            events_fetched: poll.events.len(),
            relays: poll.relays,
            ..Default::default()
        };

        let (extraction, triggers) = self.process_events(&poll.events).await;
        report.extraction = extraction;
        report.triggers = triggers.len();

        match self.dispatch(&triggers, now).await {
            Ok(dispatch) => report.dispatch = dispatch,
            Err(e) => tracing::error!(triggers = triggers.len(), error = %e, "Failed to dispatch triggers."),
        }
        match self.flush_windows(now).await {
            Ok(enqueued) => report.dispatch.enqueued += enqueued,
            Err(e) => tracing::error!(error = %e, "Failed to flush pending windows."),
        }

        // Retries of earlier ticks are due whatever happened above.
        match self.queue.drain(now).await {
            Ok(drain) => report.drain = drain,
            Err(e) => tracing::error!(error = %e, "Failed to drain the delivery queue."),
        }

        self.metrics
            .record_tick(report.extraction.processed as u64, report.triggers as u64, Utc::now())
            .await;
        self.persist_snapshots().await;

        tracing::info!(
            events = report.events_fetched,
            processed = report.extraction.processed,
            triggers = report.triggers,
            enqueued = report.dispatch.enqueued,
            delivered = report.drain.delivered,
            retried = report.drain.retried,
            "Tick completed."
        );
        Ok(Some(report))
    }

    /// Runs events through extraction one by one. A failing event is logged
    /// and skipped; it does not abort the batch.
    pub async fn process_events(&self, events: &[Event]) -> (ExtractionReport, Vec<NotificationTrigger>) {
        let mut report = ExtractionReport::default();
        let mut triggers = Vec::new();

        for event in events {
            match self.extractor.extract(event).await {
                Ok(Extraction::Triggers(produced)) => {
                    report.processed += 1;
                    triggers.extend(produced);
                }
                Ok(Extraction::Invalid(_)) => report.invalid += 1,
                Ok(Extraction::AlreadyProcessed | Extraction::ClaimLost) => report.duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(event_id = %event.id, error = %e, "Failed to process event.");
                }
            }
        }

        (report, triggers)
    }

    /// Gates `triggers` and enqueues whatever must be sent now.
    pub async fn dispatch(
        &self,
        triggers: &[NotificationTrigger],
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, PipelineError> {
        if triggers.is_empty() {
            return Ok(DispatchReport::default());
        }
        let _guard = self.dispatch_lock.lock().await;
        let AggregationOutcome { ready, deferred, filtered } =
            self.aggregator.aggregate(triggers, now).await?;
        let enqueued = self.enqueue_all(ready, now).await;
        Ok(DispatchReport { enqueued, deferred, filtered })
    }

    /// Enqueues the pending windows due at `now`. Returns the number of
    /// queue items created.
    pub async fn flush_windows(&self, now: DateTime<Utc>) -> Result<usize, PipelineError> {
        let _guard = self.dispatch_lock.lock().await;
        let flushed = self.aggregator.flush_due_windows(now).await?;
        Ok(self.enqueue_all(flushed, now).await)
    }

    /// Enqueues each notification and clears its triggers from the pending
    /// window. A notification that cannot be enqueued is parked in the
    /// window instead, so the next flush retries it.
    async fn enqueue_all(&self, ready: Vec<ReadyNotification>, now: DateTime<Utc>) -> usize {
        let mut enqueued = 0;
        for notification in ready {
            let subscriber_id = notification.subscriber_id.as_str();
            if let Err(e) = self.queue.enqueue(subscriber_id, notification.payload.clone(), now).await {
                tracing::error!(subscriber_id, error = %e, "Failed to enqueue notification, parking it.");
                if let Err(e) = self.aggregator.park(&notification, now).await {
                    tracing::error!(subscriber_id, triggers = notification.trigger_count, error = %e, "Failed to park notification, triggers lost.");
                }
                continue;
            }
            enqueued += 1;

            if let Err(e) = self.aggregator.settle(&notification).await {
                tracing::error!(subscriber_id, error = %e, "Failed to clear enqueued triggers from the pending window.");
            }
            if let Err(e) = self
                .registry
                .record_notification(subscriber_id, now, self.policy.rate_limit_window)
                .await
            {
                tracing::warn!(subscriber_id, error = %e, "Failed to update the rate window.");
            }
        }
        enqueued
    }

    /// Writes the metrics snapshot and the log buffer to the store.
    pub async fn persist_snapshots(&self) {
        let snapshot = self.metrics.snapshot().await;
        if let Err(e) = self.state_repository.set_json_state(METRICS_SNAPSHOT_KEY, &snapshot).await
        {
            tracing::warn!(error = %e, "Failed to persist metrics snapshot.");
        }
        let logs = self.logs.snapshot();
        if let Err(e) = self.state_repository.set_json_state(LOG_BUFFER_KEY, &logs).await {
            tracing::warn!(error = %e, "Failed to persist log buffer.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        models::{Priority, TriggerType},
        persistence::{keys::pending_key, traits::KeyValueStore},
        push::MockPushTransport,
        relay::traits::MockRelaySource,
        test_helpers::{create_test_repo, subscription_request},
    };

    async fn pipeline(
        transport: MockPushTransport,
    ) -> Pipeline<SqliteStateRepository, MockRelaySource, MockPushTransport> {
        let repo = create_test_repo().await;
        let registry = Arc::new(SubscriberRegistry::new(repo.clone()));
        Pipeline::new(
            &AppConfig::builder().build(),
            repo,
            registry,
            Arc::new(MockRelaySource::new()),
            Arc::new(transport),
            AppMetrics::default(),
            LogBuffer::default(),
        )
    }

    fn mention(to: &str) -> NotificationTrigger {
        NotificationTrigger {
            source_event_id: "e1".into(),
            trigger_type: TriggerType::Mention,
            priority: Priority::High,
            target_subscriber_ids: vec![to.to_string()],
            group_id: None,
            keyword: None,
            author: "someone".into(),
            excerpt: "hi".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_enqueues_and_counts_rate_window() {
        let pipeline = pipeline(MockPushTransport::new()).await;
        pipeline.registry().subscribe(subscription_request("u1", &[], &[])).await.unwrap();

        let report = pipeline.dispatch(&[mention("u1")], Utc::now()).await.unwrap();

        assert_eq!(report, DispatchReport { enqueued: 1, deferred: 0, filtered: 0 });
        assert_eq!(pipeline.queue().depth().await.unwrap(), 1);
        let record = pipeline.registry().get("u1").await.unwrap().unwrap();
        assert_eq!(record.notification_count_in_window, 1);
    }

    #[tokio::test]
    async fn test_failed_enqueue_is_parked_and_retried() {
        let pipeline = pipeline(MockPushTransport::new()).await;
        pipeline.registry().subscribe(subscription_request("u1", &[], &[])).await.unwrap();

        let pool = pipeline.state_repository.pool();
        sqlx::query(
            "CREATE TRIGGER reject_queue_items BEFORE INSERT ON application_state \
             WHEN NEW.key LIKE 'queue:%' BEGIN SELECT RAISE(ABORT, 'queue unavailable'); END",
        )
        .execute(pool)
        .await
        .unwrap();

        let now = Utc::now();
        let report = pipeline.dispatch(&[mention("u1")], now).await.unwrap();
        assert_eq!(report.enqueued, 0);
        assert_eq!(pipeline.queue().depth().await.unwrap(), 0);
        let parked = pipeline
            .state_repository
            .get_json_state::<crate::models::PendingNotifications>(&pending_key("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parked.triggers.len(), 1);

        sqlx::query("DROP TRIGGER reject_queue_items").execute(pool).await.unwrap();

        assert_eq!(pipeline.flush_windows(now).await.unwrap(), 1);
        assert_eq!(pipeline.queue().depth().await.unwrap(), 1);
        assert!(pipeline
            .state_repository
            .get_json_state::<crate::models::PendingNotifications>(&pending_key("u1"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(pipeline.flush_windows(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_of_nothing_is_a_noop() {
        let pipeline = pipeline(MockPushTransport::new()).await;
        assert_eq!(pipeline.dispatch(&[], Utc::now()).await.unwrap(), DispatchReport::default());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let pipeline = pipeline(MockPushTransport::new()).await;
        let _held = pipeline.tick_guard.lock().await;
        assert!(pipeline.run_tick(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshots_are_persisted() {
        let pipeline = pipeline(MockPushTransport::new()).await;
        pipeline.metrics().record_failure("timeout").await;
        pipeline.persist_snapshots().await;

        let stored = pipeline
            .state_repository
            .get_json_state::<crate::context::MetricsSnapshot>(METRICS_SNAPSHOT_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.failed, 1);
    }
}
