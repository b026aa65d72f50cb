//! Subscriber records and notification preferences.

use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};

use super::trigger::TriggerType;

/// Browser-provided encryption material of a push subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushKeys {
    /// The client's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// The client's authentication secret (base64url).
    pub auth: String,
}

/// How often non-urgent notifications are flushed to a subscriber.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every surviving trigger is delivered in the tick it was produced.
    #[default]
    Immediate,
    /// Triggers accumulate and are flushed once per hour.
    Hourly,
    /// Triggers accumulate and are flushed once per day.
    Daily,
}

impl Frequency {
    /// Length of the accumulation window, `None` for immediate delivery.
    pub fn window(&self) -> Option<Duration> {
        match self {
            Frequency::Immediate => None,
            Frequency::Hourly => Some(Duration::from_secs(3600)),
            Frequency::Daily => Some(Duration::from_secs(24 * 3600)),
        }
    }
}

/// A local-time hour range during which only high-priority notifications
/// are delivered. The range may wrap past midnight (`22 -> 7`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    /// First quiet hour, 0-23.
    pub start_hour: u32,
    /// First hour after the quiet range, 0-23.
    pub end_hour: u32,
    /// IANA timezone name; UTC when absent or unknown.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl QuietHours {
    /// Returns true if `now` falls inside the quiet range in the
    /// subscriber's timezone.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let tz: Tz = self
            .timezone
            .as_deref()
            .and_then(|name| name.parse().ok())
            .unwrap_or(chrono_tz::UTC);
        let hour = now.with_timezone(&tz).hour();
        let (start, end) = (self.start_hour % 24, self.end_hour % 24);

        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-category opt-ins and delivery cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Notify when the subscriber is mentioned.
    #[serde(default = "default_true")]
    pub mentions: bool,
    /// Notify about posts in subscribed groups.
    #[serde(default = "default_true")]
    pub group_activity: bool,
    /// Notify about reactions to the subscriber's events.
    #[serde(default)]
    pub reactions: bool,
    /// Notify about moderation actions targeting the subscriber.
    #[serde(default = "default_true")]
    pub moderation: bool,
    /// Flush cadence for non-urgent notifications.
    #[serde(default)]
    pub frequency: Frequency,
    /// Optional quiet range.
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mentions: true,
            group_activity: true,
            reactions: false,
            moderation: true,
            frequency: Frequency::Immediate,
            quiet_hours: None,
        }
    }
}

impl Preferences {
    /// Whether the category of a trigger is enabled. Keyword matches have no
    /// flag of their own: subscribing to a keyword is the opt-in.
    pub fn allows(&self, trigger_type: TriggerType) -> bool {
        match trigger_type {
            TriggerType::Mention => self.mentions,
            TriggerType::GroupActivity => self.group_activity,
            TriggerType::Reaction => self.reactions,
            TriggerType::Moderation => self.moderation,
            TriggerType::Keyword => true,
        }
    }

    /// Applies the fields present in a partial update.
    pub fn apply(&mut self, update: &PreferencesUpdate) {
        if let Some(v) = update.mentions {
            self.mentions = v;
        }
        if let Some(v) = update.group_activity {
            self.group_activity = v;
        }
        if let Some(v) = update.reactions {
            self.reactions = v;
        }
        if let Some(v) = update.moderation {
            self.moderation = v;
        }
        if let Some(v) = update.frequency {
            self.frequency = v;
        }
        if let Some(v) = &update.quiet_hours {
            self.quiet_hours = v.clone();
        }
    }
}

/// Distinguishes an explicit `null` (clear) from an absent field.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A partial preference change. Absent fields are left untouched; group and
/// keyword lists, when present, replace the current sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesUpdate {
    /// New mentions flag.
    #[serde(default)]
    pub mentions: Option<bool>,
    /// New group activity flag.
    #[serde(default)]
    pub group_activity: Option<bool>,
    /// New reactions flag.
    #[serde(default)]
    pub reactions: Option<bool>,
    /// New moderation flag.
    #[serde(default)]
    pub moderation: Option<bool>,
    /// New frequency.
    #[serde(default)]
    pub frequency: Option<Frequency>,
    /// `Some(None)` clears the quiet hours.
    #[serde(default, deserialize_with = "deserialize_some")]
    pub quiet_hours: Option<Option<QuietHours>>,
    /// Replacement group subscriptions.
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    /// Replacement keyword subscriptions.
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

/// Everything the registry knows about one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberRecord {
    /// Normalized subscriber id (hex public key or opaque id).
    pub subscriber_id: String,
    /// Push service endpoint URL.
    pub push_endpoint: String,
    /// Push encryption keys.
    pub push_keys: PushKeys,
    /// Notification preferences.
    pub preferences: Preferences,
    /// Groups the subscriber follows.
    #[serde(default)]
    pub subscribed_groups: BTreeSet<String>,
    /// Lower-cased keywords the subscriber follows.
    #[serde(default)]
    pub subscribed_keywords: BTreeSet<String>,
    /// When the last payload was enqueued for this subscriber.
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Payloads enqueued since `window_started_at`.
    #[serde(default)]
    pub notification_count_in_window: u32,
    /// Start of the current rate window.
    #[serde(default)]
    pub window_started_at: Option<DateTime<Utc>>,
    /// Creation time of the record.
    pub created_at: DateTime<Utc>,
    /// Last modification time of the record.
    pub updated_at: DateTime<Utc>,
}

impl SubscriberRecord {
    /// Number of notifications counted against the rate window at `now`.
    pub fn notifications_in_window(&self, now: DateTime<Utc>, window: Duration) -> u32 {
        match self.window_started_at {
            Some(started) if in_window(started, now, window) => self.notification_count_in_window,
            _ => 0,
        }
    }

    /// Counts one more notification, opening a new rate window if the
    /// current one has elapsed.
    pub fn register_notification(&mut self, now: DateTime<Utc>, window: Duration) {
        match self.window_started_at {
            Some(started) if in_window(started, now, window) => {
                self.notification_count_in_window += 1;
            }
            _ => {
                self.window_started_at = Some(now);
                self.notification_count_in_window = 1;
            }
        }
        self.last_notified_at = Some(now);
    }
}

fn in_window(started: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match chrono::Duration::from_std(window) {
        Ok(window) => now < started + window,
        Err(_) => true,
    }
}
