//! Per-recipient gating and batching of triggers.
//!
//! Every trigger is fanned out to its recipients and passes, per recipient,
//! the preference gate, the quiet-hours gate and the rate gate. Survivors
//! are either flushed into one payload right away or parked in the
//! recipient's pending window until it expires.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde_json::json;

use super::error::PipelineError;
use crate::{
    config::NotificationPolicyConfig,
    locks::KeyedLocks,
    models::{
        NotificationPayload, NotificationTrigger, PendingNotifications, Priority,
        SubscriberRecord, TriggerType,
    },
    persistence::{
        keys::{PENDING_PREFIX, pending_key},
        traits::KeyValueStore,
    },
    registry::SubscriberRegistry,
};

/// Result of the gates for one trigger and one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The trigger survives.
    Pass,
    /// The recipient opted out of this category.
    PreferenceFiltered,
    /// The recipient is inside quiet hours and the trigger is not high.
    QuietHours,
    /// The recipient reached the rate cap and the trigger is not high.
    RateLimited,
}

/// A payload ready to be enqueued for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyNotification {
    /// Recipient.
    pub subscriber_id: String,
    /// Aggregated payload.
    pub payload: NotificationPayload,
    /// Number of triggers folded into the payload.
    pub trigger_count: usize,
    /// The triggers folded into the payload. Those that came from the
    /// pending window stay there until [`Aggregator::settle`] runs.
    pub triggers: Vec<NotificationTrigger>,
}

/// What one aggregation pass decided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationOutcome {
    /// Payloads to enqueue now.
    pub ready: Vec<ReadyNotification>,
    /// Recipients whose triggers were parked in a pending window.
    pub deferred: usize,
    /// Trigger/recipient pairs removed by a gate.
    pub filtered: usize,
}

type TriggerIdentity<'a> = (&'a str, TriggerType);

fn identity(trigger: &NotificationTrigger) -> TriggerIdentity<'_> {
    (trigger.source_event_id.as_str(), trigger.trigger_type)
}

/// Applies the gates and batches triggers per recipient.
pub struct Aggregator<S: KeyValueStore + ?Sized> {
    state_repository: Arc<S>,
    registry: Arc<SubscriberRegistry<S>>,
    policy: NotificationPolicyConfig,
    pending_locks: KeyedLocks,
}

impl<S: KeyValueStore + ?Sized> Aggregator<S> {
    /// Creates an aggregator.
    pub fn new(
        state_repository: Arc<S>,
        registry: Arc<SubscriberRegistry<S>>,
        policy: NotificationPolicyConfig,
    ) -> Self {
        Self { state_repository, registry, policy, pending_locks: KeyedLocks::new() }
    }

    /// Number of per-subscriber locks currently allocated.
    pub fn lock_count(&self) -> usize {
        self.pending_locks.len()
    }

    /// Runs the gates for one recipient.
    pub fn gate(
        &self,
        record: &SubscriberRecord,
        trigger: &NotificationTrigger,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if !record.preferences.allows(trigger.trigger_type) {
            return GateDecision::PreferenceFiltered;
        }
        if trigger.priority == Priority::High {
            return GateDecision::Pass;
        }
        if record.preferences.quiet_hours.as_ref().is_some_and(|q| q.is_active(now)) {
            return GateDecision::QuietHours;
        }
        if record.notifications_in_window(now, self.policy.rate_limit_window)
            >= self.policy.rate_limit_max
        {
            return GateDecision::RateLimited;
        }
        GateDecision::Pass
    }

    /// Gates and batches `triggers`, returning the payloads to enqueue now.
    pub async fn aggregate(
        &self,
        triggers: &[NotificationTrigger],
        now: DateTime<Utc>,
    ) -> Result<AggregationOutcome, PipelineError> {
        let mut by_recipient: BTreeMap<&str, Vec<&NotificationTrigger>> = BTreeMap::new();
        for trigger in triggers {
            for recipient in &trigger.target_subscriber_ids {
                by_recipient.entry(recipient.as_str()).or_default().push(trigger);
            }
        }

        let mut outcome = AggregationOutcome::default();
        for (recipient, candidates) in by_recipient {
            let Some(record) = self.registry.get(recipient).await? else {
                continue;
            };

            let mut seen = BTreeSet::new();
            let mut survivors = Vec::new();
            for trigger in candidates {
                if !seen.insert(identity(trigger)) {
                    continue;
                }
                match self.gate(&record, trigger, now) {
                    GateDecision::Pass => survivors.push(trigger.clone()),
                    decision => {
                        outcome.filtered += 1;
                        tracing::debug!(
                            subscriber_id = %record.subscriber_id,
                            event_id = %trigger.source_event_id,
                            trigger_type = ?trigger.trigger_type,
                            decision = ?decision,
                            "Trigger filtered."
                        );
                    }
                }
            }
            if survivors.is_empty() {
                continue;
            }

            let urgent = survivors.iter().any(|t| t.priority == Priority::High);
            let immediate = record.preferences.frequency.window().is_none();

            let _guard = self.pending_locks.lock(&record.subscriber_id).await;
            let key = pending_key(&record.subscriber_id);
            let pending = self.state_repository.get_json_state::<PendingNotifications>(&key).await?;

            if urgent || immediate {
                // Windowed triggers the gates now hold back stay in the window;
                // the rest leave it through `settle` once the batch is enqueued.
                let mut batch: Vec<NotificationTrigger> = pending
                    .map(|p| p.triggers)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|t| self.gate(&record, t, now) == GateDecision::Pass)
                    .collect();
                merge_triggers(&mut batch, survivors);
                outcome.ready.push(self.ready(&record.subscriber_id, batch));
            } else {
                let mut pending = pending.unwrap_or_else(|| PendingNotifications {
                    subscriber_id: record.subscriber_id.clone(),
                    ..Default::default()
                });
                pending.window_started_at.get_or_insert(now);
                merge_triggers(&mut pending.triggers, survivors);
                self.state_repository.set_json_state(&key, &pending).await?;
                outcome.deferred += 1;
                tracing::debug!(
                    subscriber_id = %record.subscriber_id,
                    pending = pending.triggers.len(),
                    "Triggers deferred to the next flush window."
                );
            }
        }

        Ok(outcome)
    }

    /// Flushes every pending window that has expired at `now`. Windows of
    /// removed subscribers are discarded.
    ///
    /// Windowed triggers pass the gates again against the subscriber's
    /// current record: opted-out categories are dropped, and triggers held
    /// back by quiet hours or the rate cap stay in the window until a later
    /// flush lets them through.
    pub async fn flush_due_windows(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReadyNotification>, PipelineError> {
        let windows = self
            .state_repository
            .get_all_json_states_by_prefix::<PendingNotifications>(PENDING_PREFIX)
            .await?;

        let mut ready = Vec::new();
        for (key, window) in windows {
            let _guard = self.pending_locks.lock(&window.subscriber_id).await;
            if let Some(notification) = self.flush_window(&key, now).await? {
                ready.push(notification);
            }
        }

        Ok(ready)
    }

    /// Flushes one window. The caller holds the subscriber's pending lock.
    async fn flush_window(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReadyNotification>, PipelineError> {
        let Some(mut window) = self.state_repository.get_json_state::<PendingNotifications>(key).await?
        else {
            return Ok(None);
        };
        let Some(record) = self.registry.get(&window.subscriber_id).await? else {
            self.state_repository.delete_json_state(key).await?;
            return Ok(None);
        };

        let due = match (record.preferences.frequency.window(), window.window_started_at) {
            (Some(length), Some(started)) => chrono::Duration::from_std(length)
                .map(|length| started + length <= now)
                .unwrap_or(true),
            _ => true,
        };
        if !due {
            return Ok(None);
        }

        let mut deliver = Vec::new();
        let mut held = 0;
        let before = window.triggers.len();
        window.triggers.retain(|trigger| match self.gate(&record, trigger, now) {
            GateDecision::Pass => {
                deliver.push(trigger.clone());
                true
            }
            GateDecision::QuietHours | GateDecision::RateLimited => {
                held += 1;
                true
            }
            GateDecision::PreferenceFiltered => false,
        });

        let dropped = before - window.triggers.len();
        if window.triggers.is_empty() {
            self.state_repository.delete_json_state(key).await?;
        } else if dropped > 0 {
            self.state_repository.set_json_state(key, &window).await?;
        }
        if dropped > 0 || held > 0 {
            tracing::debug!(subscriber_id = %record.subscriber_id, dropped, held, "Pending window re-gated.");
        }
        if deliver.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            subscriber_id = %record.subscriber_id,
            triggers = deliver.len(),
            "Flushing pending notification window."
        );
        Ok(Some(self.ready(&record.subscriber_id, deliver)))
    }

    /// Removes the triggers of an enqueued notification from the
    /// recipient's pending window.
    pub async fn settle(&self, notification: &ReadyNotification) -> Result<(), PipelineError> {
        let _guard = self.pending_locks.lock(&notification.subscriber_id).await;
        let key = pending_key(&notification.subscriber_id);
        let Some(mut window) = self.state_repository.get_json_state::<PendingNotifications>(&key).await?
        else {
            return Ok(());
        };

        let sent: BTreeSet<TriggerIdentity<'_>> = notification.triggers.iter().map(identity).collect();
        let before = window.triggers.len();
        window.triggers.retain(|trigger| !sent.contains(&identity(trigger)));

        if window.triggers.is_empty() {
            self.state_repository.delete_json_state(&key).await?;
        } else if window.triggers.len() != before {
            self.state_repository.set_json_state(&key, &window).await?;
        }
        Ok(())
    }

    /// Puts the triggers of a notification that could not be enqueued back
    /// into the recipient's pending window, where the next flush finds them.
    pub async fn park(
        &self,
        notification: &ReadyNotification,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let _guard = self.pending_locks.lock(&notification.subscriber_id).await;
        let key = pending_key(&notification.subscriber_id);
        let mut window = self
            .state_repository
            .get_json_state::<PendingNotifications>(&key)
            .await?
            .unwrap_or_else(|| PendingNotifications {
                subscriber_id: notification.subscriber_id.clone(),
                ..Default::default()
            });
        window.window_started_at.get_or_insert(now);
        merge_triggers(&mut window.triggers, notification.triggers.iter().cloned());
        self.state_repository.set_json_state(&key, &window).await?;
        Ok(())
    }

    fn ready(&self, subscriber_id: &str, triggers: Vec<NotificationTrigger>) -> ReadyNotification {
        ReadyNotification {
            subscriber_id: subscriber_id.to_string(),
            payload: build_payload(&triggers, self.policy.app_url.as_deref()),
            trigger_count: triggers.len(),
            triggers,
        }
    }
}

/// Appends the triggers not already in `batch`.
fn merge_triggers(
    batch: &mut Vec<NotificationTrigger>,
    triggers: impl IntoIterator<Item = NotificationTrigger>,
) {
    for trigger in triggers {
        if !batch.iter().any(|existing| identity(existing) == identity(&trigger)) {
            batch.push(trigger);
        }
    }
}

/// Most event ids a summary payload lists. A push message carries at most
/// [`MAX_PAYLOAD_BYTES`](crate::push::MAX_PAYLOAD_BYTES) of JSON, so a
/// digest lists the first ids plus the total count.
pub const MAX_PAYLOAD_EVENT_IDS: usize = 20;

/// Builds the payload for a batch of triggers: a type-specific title for a
/// single trigger, otherwise a summary counting each type.
pub fn build_payload(triggers: &[NotificationTrigger], app_url: Option<&str>) -> NotificationPayload {
    let mut event_ids: Vec<&str> = Vec::new();
    for trigger in triggers {
        if !event_ids.contains(&trigger.source_event_id.as_str()) {
            event_ids.push(&trigger.source_event_id);
        }
    }
    let urgent = triggers.iter().any(|t| t.priority == Priority::High);
    let app_url = app_url.map(|url| url.trim_end_matches('/'));

    if let [trigger] = triggers {
        let title = match (&trigger.trigger_type, &trigger.keyword) {
            (TriggerType::Keyword, Some(keyword)) => format!("{}: {keyword}", trigger.trigger_type.title()),
            _ => trigger.trigger_type.title().to_string(),
        };
        let url = app_url.map(|base| match &trigger.group_id {
            Some(group) => format!("{base}/groups/{group}"),
            None => format!("{base}/e/{}", trigger.source_event_id),
        });
        return NotificationPayload {
            title,
            body: trigger.excerpt.clone(),
            data: json!({
                "type": trigger.trigger_type,
                "eventIds": event_ids,
                "groupId": trigger.group_id,
                "author": trigger.author,
                "priority": if urgent { "high" } else { "normal" },
                "url": url,
            }),
        };
    }

    let mut counts: BTreeMap<TriggerType, usize> = BTreeMap::new();
    for trigger in triggers {
        *counts.entry(trigger.trigger_type).or_insert(0) += 1;
    }
    let summary: Vec<String> =
        counts.iter().map(|(trigger_type, count)| trigger_type.summary(*count)).collect();

    NotificationPayload {
        title: format!("{} new notifications", triggers.len()),
        body: summary.join(", "),
        data: json!({
            "type": "summary",
            "eventIds": &event_ids[..event_ids.len().min(MAX_PAYLOAD_EVENT_IDS)],
            "count": event_ids.len(),
            "priority": if urgent { "high" } else { "normal" },
            "url": app_url,
        }),
    }
}
