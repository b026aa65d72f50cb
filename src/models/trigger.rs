//! Ephemeral notification triggers derived from events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an event concerns a subscriber.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// The subscriber was tagged or referenced.
    Mention,
    /// Someone posted in a group the subscriber follows.
    GroupActivity,
    /// The content matched a followed keyword.
    Keyword,
    /// A moderation action targets the subscriber.
    Moderation,
    /// Someone reacted to the subscriber's event.
    Reaction,
}

impl TriggerType {
    /// Payload title used when this is the only surviving trigger.
    pub fn title(&self) -> &'static str {
        match self {
            TriggerType::Mention => "You were mentioned",
            TriggerType::GroupActivity => "New activity in your group",
            TriggerType::Keyword => "Keyword match",
            TriggerType::Moderation => "Moderation update",
            TriggerType::Reaction => "New reaction",
        }
    }

    /// Noun phrase used in summaries, e.g. "2 mentions".
    pub fn summary(&self, count: usize) -> String {
        let (singular, plural) = match self {
            TriggerType::Mention => ("mention", "mentions"),
            TriggerType::GroupActivity => ("group update", "group updates"),
            TriggerType::Keyword => ("keyword match", "keyword matches"),
            TriggerType::Moderation => ("moderation action", "moderation actions"),
            TriggerType::Reaction => ("reaction", "reactions"),
        };
        format!("{count} {}", if count == 1 { singular } else { plural })
    }
}

/// Delivery urgency. High bypasses quiet hours, rate limits and batching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Delivered immediately regardless of gates.
    High,
    /// Subject to every gate.
    #[default]
    Normal,
    /// Subject to every gate.
    Low,
}

/// A decision that an event should notify a set of subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTrigger {
    /// The event that produced the trigger.
    pub source_event_id: String,
    /// Trigger category.
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Delivery urgency.
    pub priority: Priority,
    /// Candidate recipients, never including the event author.
    pub target_subscriber_ids: Vec<String>,
    /// Group the event was posted to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Keyword that matched, for keyword triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// Author of the source event.
    #[serde(default)]
    pub author: String,
    /// Leading part of the event content.
    pub excerpt: String,
    /// Creation time of the source event.
    pub timestamp: DateTime<Utc>,
}
