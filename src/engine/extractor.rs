//! Turns verified events into notification triggers.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};

use super::error::PipelineError;
use crate::{
    config::NotificationPolicyConfig,
    models::{
        Event, EventValidationError, NotificationTrigger, Priority, TriggerType, kinds,
        keys::{content_pubkey_references, normalize_identifier},
    },
    persistence::traits::AppRepository,
    registry::SubscriberRegistry,
};

/// Result of running one event through the extractor.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The event was claimed; these triggers (possibly none) must be handled.
    Triggers(Vec<NotificationTrigger>),
    /// The id or signature did not verify.
    Invalid(EventValidationError),
    /// A marker for this event already exists.
    AlreadyProcessed,
    /// Another processor claimed the event between the check and the claim.
    ClaimLost,
}

/// Classifies events into triggers and records them as processed.
pub struct TriggerExtractor<S: AppRepository + ?Sized> {
    state_repository: Arc<S>,
    registry: Arc<SubscriberRegistry<S>>,
    policy: NotificationPolicyConfig,
    processed_event_ttl: Duration,
}

impl<S: AppRepository + ?Sized> TriggerExtractor<S> {
    /// Creates an extractor.
    pub fn new(
        state_repository: Arc<S>,
        registry: Arc<SubscriberRegistry<S>>,
        policy: NotificationPolicyConfig,
        processed_event_ttl: Duration,
    ) -> Self {
        Self { state_repository, registry, policy, processed_event_ttl }
    }

    /// Verifies, classifies and claims one event.
    pub async fn extract(&self, event: &Event) -> Result<Extraction, PipelineError> {
        if let Err(e) = event.verify() {
            tracing::warn!(event_id = %event.id, pubkey = %event.pubkey, error = %e, "Discarding event that failed verification.");
            return Ok(Extraction::Invalid(e));
        }

        let event_id = event.id.to_ascii_lowercase();
        if self.state_repository.has_processed(&event_id).await? {
            tracing::debug!(event_id = %event_id, "Event already processed, skipping.");
            return Ok(Extraction::AlreadyProcessed);
        }

        let triggers = self.classify(event).await?;

        if !self.state_repository.mark_processed(&event_id, self.processed_event_ttl).await? {
            tracing::debug!(event_id = %event_id, "Event claimed concurrently, dropping triggers.");
            return Ok(Extraction::ClaimLost);
        }

        tracing::debug!(event_id = %event_id, kind = event.kind, triggers = triggers.len(), "Event classified.");
        Ok(Extraction::Triggers(triggers))
    }

    /// Derives the triggers of an event without verifying or claiming it.
    /// The author is never a recipient.
    pub async fn classify(&self, event: &Event) -> Result<Vec<NotificationTrigger>, PipelineError> {
        let author = normalize_identifier(&event.pubkey);
        let event_excerpt = excerpt(&event.content, self.policy.excerpt_length);
        let timestamp = event_timestamp(event.created_at);
        let group_id = event.group_id();

        let trigger = |trigger_type, priority, targets: BTreeSet<String>| NotificationTrigger {
            source_event_id: event.id.to_ascii_lowercase(),
            trigger_type,
            priority,
            target_subscriber_ids: targets.into_iter().collect(),
            group_id: group_id.clone(),
            keyword: None,
            author: author.clone(),
            excerpt: event_excerpt.clone(),
            timestamp,
        };
        let without_author = |ids: Vec<String>| -> BTreeSet<String> {
            ids.into_iter().filter(|id| *id != author).collect()
        };

        let mut triggers = Vec::new();

        if event.kind == kinds::REACTION {
            if let Some((_, target_author)) = event.reaction_target() {
                let targets = without_author(vec![target_author]);
                if !targets.is_empty() {
                    triggers.push(trigger(TriggerType::Reaction, Priority::Normal, targets));
                }
            }
            return Ok(triggers);
        }

        if kinds::is_moderation(event.kind) {
            let targets = without_author(event.tagged_pubkeys());
            if !targets.is_empty() {
                triggers.push(trigger(TriggerType::Moderation, Priority::High, targets));
            }
            return Ok(triggers);
        }

        let mut mentioned = event.tagged_pubkeys();
        mentioned.extend(content_pubkey_references(&event.content));
        let mentioned = without_author(mentioned);
        if !mentioned.is_empty() {
            triggers.push(trigger(TriggerType::Mention, Priority::High, mentioned));
        }

        if let Some(group) = &group_id {
            // Members follow either the bare identifier or the owner-scoped
            // coordinate of a community.
            let mut members = self.registry.list_group_members(group).await?;
            if let Some(address) = event.group_address() {
                members.extend(self.registry.list_group_members(&address).await?);
            }
            let members = without_author(members);
            if !members.is_empty() {
                triggers.push(trigger(TriggerType::GroupActivity, Priority::Normal, members));
            }
        }

        let content = event.content.to_lowercase();
        for keyword in self.registry.list_keywords().await? {
            if !content.contains(&keyword) {
                continue;
            }
            let subscribers =
                without_author(self.registry.list_keyword_subscribers(&keyword).await?);
            if subscribers.is_empty() {
                continue;
            }
            let priority = if self.policy.is_urgent_keyword(&keyword) {
                Priority::High
            } else {
                Priority::Normal
            };
            let mut keyword_trigger = trigger(TriggerType::Keyword, priority, subscribers);
            keyword_trigger.keyword = Some(keyword);
            triggers.push(keyword_trigger);
        }

        Ok(triggers)
    }
}

/// Collapses whitespace and cuts `content` to at most `max_chars` characters.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

fn event_timestamp(created_at: u64) -> DateTime<Utc> {
    i64::try_from(created_at)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}
