use std::time::Duration;

use serde::Deserialize;

use super::{deserialize_duration_from_ms, deserialize_durations_from_seconds};

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_schedule() -> Vec<Duration> {
    vec![Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(15)]
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency() -> usize {
    8
}

/// Retry and throughput settings for the delivery queue.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Number of failed attempts after which an item is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the n-th retry; the last entry is reused once the
    /// schedule is exhausted.
    #[serde(
        deserialize_with = "deserialize_durations_from_seconds",
        default = "default_backoff_schedule"
    )]
    pub backoff_schedule: Vec<Duration>,

    /// Timeout applied to a single push send.
    #[serde(deserialize_with = "deserialize_duration_from_ms", default = "default_send_timeout")]
    pub send_timeout: Duration,

    /// Number of subscribers whose queues are drained concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_schedule: default_backoff_schedule(),
            send_timeout: default_send_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

impl DeliveryConfig {
    /// Backoff to apply after the given number of failed attempts (1-based),
    /// capped at the last schedule entry.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if self.backoff_schedule.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempts.max(1) as usize - 1).min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[index]
    }
}
