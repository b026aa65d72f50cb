//! Delivery counters, latency window and error breakdown shared by the
//! pipeline and the HTTP status endpoints.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Number of delivery time samples kept for the rolling average.
pub const MAX_DELIVERY_SAMPLES: usize = 1000;

/// Serializable delivery and pipeline counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSnapshot {
    /// Send attempts, whatever their outcome.
    pub total_sent: u64,
    /// Attempts accepted by the push service.
    pub succeeded: u64,
    /// Attempts that failed transiently.
    pub failed: u64,
    /// Attempts rejected because the subscription is gone.
    pub invalid_subscriptions: u64,
    /// Most recent successful delivery times, oldest first.
    pub delivery_times_ms: VecDeque<u64>,
    /// Mean of `delivery_times_ms`.
    pub average_delivery_time_ms: f64,
    /// Failure count per reason.
    pub errors: BTreeMap<String, u64>,
    /// Events that went through trigger extraction.
    pub events_processed: u64,
    /// Triggers produced by extraction.
    pub triggers_produced: u64,
    /// End of the last completed tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    fn recompute_average(&mut self) {
        self.average_delivery_time_ms = if self.delivery_times_ms.is_empty() {
            0.0
        } else {
            self.delivery_times_ms.iter().sum::<u64>() as f64 / self.delivery_times_ms.len() as f64
        };
    }
}

/// A struct to hold application metrics.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// The time the application started.
    pub start_time: tokio::time::Instant,
    /// Delivery and pipeline counters.
    pub snapshot: MetricsSnapshot,
}

impl Default for Metrics {
    fn default() -> Self {
        Self { start_time: tokio::time::Instant::now(), snapshot: MetricsSnapshot::default() }
    }
}

/// Shared application metrics, written by the pipeline and the delivery
/// queue and read by the HTTP server.
#[derive(Clone, Default)]
pub struct AppMetrics {
    /// Shared metrics.
    pub metrics: Arc<RwLock<Metrics>>,
}

impl AppMetrics {
    /// Counts a successful delivery that took `delivery_time_ms`.
    pub async fn record_success(&self, delivery_time_ms: u64) {
        let mut metrics = self.metrics.write().await;
        let snapshot = &mut metrics.snapshot;
        snapshot.total_sent += 1;
        snapshot.succeeded += 1;
        snapshot.delivery_times_ms.push_back(delivery_time_ms);
        while snapshot.delivery_times_ms.len() > MAX_DELIVERY_SAMPLES {
            snapshot.delivery_times_ms.pop_front();
        }
        snapshot.recompute_average();
    }

    /// Counts a failed delivery under `reason`.
    pub async fn record_failure(&self, reason: &str) {
        let mut metrics = self.metrics.write().await;
        let snapshot = &mut metrics.snapshot;
        snapshot.total_sent += 1;
        snapshot.failed += 1;
        *snapshot.errors.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Counts a delivery rejected because the subscription no longer exists.
    pub async fn record_invalid_subscription(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.snapshot.total_sent += 1;
        metrics.snapshot.invalid_subscriptions += 1;
    }

    /// Records the end of a pipeline tick.
    pub async fn record_tick(&self, events: u64, triggers: u64, at: DateTime<Utc>) {
        let mut metrics = self.metrics.write().await;
        metrics.snapshot.events_processed += events;
        metrics.snapshot.triggers_produced += triggers;
        metrics.snapshot.last_tick_at = Some(at);
    }

    /// A copy of the current counters.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.read().await.snapshot.clone()
    }

    /// Replaces the counters with a previously persisted snapshot.
    pub async fn restore(&self, mut snapshot: MetricsSnapshot) {
        while snapshot.delivery_times_ms.len() > MAX_DELIVERY_SAMPLES {
            snapshot.delivery_times_ms.pop_front();
        }
        snapshot.recompute_average();
        self.metrics.write().await.snapshot = snapshot;
    }

    /// Percentage of send attempts that succeeded; 0 before the first send.
    pub async fn success_rate(&self) -> f64 {
        let metrics = self.metrics.read().await;
        let snapshot = &metrics.snapshot;
        if snapshot.total_sent == 0 {
            return 0.0;
        }
        snapshot.succeeded as f64 / snapshot.total_sent as f64 * 100.0
    }

    /// The `n` most frequent failure reasons, most frequent first.
    pub async fn top_errors(&self, n: usize) -> Vec<(String, u64)> {
        let metrics = self.metrics.read().await;
        let mut errors: Vec<(String, u64)> =
            metrics.snapshot.errors.iter().map(|(k, v)| (k.clone(), *v)).collect();
        errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        errors.truncate(n);
        errors
    }

    /// Seconds since the process started.
    pub async fn uptime_secs(&self) -> u64 {
        self.metrics.read().await.start_time.elapsed().as_secs()
    }
}
