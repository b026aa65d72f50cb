//! The subscriber registry: CRUD over subscriber records plus the inverse
//! group and keyword indices.
//!
//! A record and its index entries are separate keys, so they cannot be
//! written atomically. The registry keeps them consistent by
//! reconciling on read: every mutation writes the record first and the index
//! entries second, inside the subscriber's critical section, and index reads
//! drop (and rewrite) members whose record no longer lists the group or
//! keyword. Entries lost between the two writes are restored by
//! [`SubscriberRegistry::rebuild_indices`], which runs at startup.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    locks::KeyedLocks,
    models::{
        Preferences, PreferencesUpdate, PushKeys, SubscriberRecord, keys::normalize_identifier,
    },
    persistence::{
        error::PersistenceError,
        keys::{
            GROUP_PREFIX, KEYWORD_PREFIX, SUBSCRIBER_PREFIX, group_key, identifier, keyword_key,
            pending_key, subscriber_key,
        },
        traits::KeyValueStore,
    },
};

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The subscription request is malformed.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// No subscriber with this id exists.
    #[error("Subscriber not found: {0}")]
    NotFound(String),

    /// The backing store failed.
    #[error("Registry storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A subscribe request as sent by the web client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    /// Subscriber id (`npub` or hex public key, or an opaque id).
    pub subscriber_id: String,
    /// Push service endpoint.
    pub push_endpoint: String,
    /// Push encryption keys.
    pub push_keys: PushKeys,
    /// Initial preferences; defaults apply to omitted fields.
    #[serde(default)]
    pub preferences: Preferences,
    /// Groups to follow. `None` keeps the current set on re-subscribe.
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    /// Keywords to follow. `None` keeps the current set on re-subscribe.
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

/// Aggregate sizes reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RegistryCounts {
    /// Number of subscriber records.
    pub subscribers: u64,
    /// Number of non-empty group index entries.
    pub groups: u64,
    /// Number of non-empty keyword index entries.
    pub keywords: u64,
}

/// Which inverse index an entry belongs to.
#[derive(Debug, Clone, Copy)]
enum Index {
    Group,
    Keyword,
}

impl Index {
    fn key(&self, value: &str) -> String {
        match self {
            Index::Group => group_key(value),
            Index::Keyword => keyword_key(value),
        }
    }

    fn lists(&self, record: &SubscriberRecord, value: &str) -> bool {
        match self {
            Index::Group => record.subscribed_groups.contains(value),
            Index::Keyword => record.subscribed_keywords.contains(value),
        }
    }
}

/// Owns every subscriber record and the group/keyword indices.
pub struct SubscriberRegistry<S: KeyValueStore + ?Sized> {
    /// The backing store.
    store: Arc<S>,

    /// Per-key locks serializing read-modify-write cycles on one key.
    locks: KeyedLocks,
}

impl<S: KeyValueStore + ?Sized> SubscriberRegistry<S> {
    /// Creates a registry over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store, locks: KeyedLocks::new() }
    }

    /// Number of keys currently locked or awaited.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Creates or replaces a subscription.
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriberRecord, RegistryError> {
        let subscriber_id = normalize_identifier(&request.subscriber_id);
        validate_request(&subscriber_id, &request)?;

        let record_key = subscriber_key(&subscriber_id);
        let _guard = self.locks.lock(&record_key).await;

        let now = Utc::now();
        let existing = self.store.get_json_state::<SubscriberRecord>(&record_key).await?;

        let (old_groups, old_keywords) = existing
            .as_ref()
            .map(|r| (r.subscribed_groups.clone(), r.subscribed_keywords.clone()))
            .unwrap_or_default();

        let groups = match &request.groups {
            Some(groups) => normalize_groups(groups),
            None => old_groups.clone(),
        };
        let keywords = match &request.keywords {
            Some(keywords) => normalize_keywords(keywords),
            None => old_keywords.clone(),
        };

        let record = match existing {
            Some(mut record) => {
                record.push_endpoint = request.push_endpoint.trim().to_string();
                record.push_keys = request.push_keys.clone();
                record.preferences = request.preferences.clone();
                record.subscribed_groups = groups;
                record.subscribed_keywords = keywords;
                record.updated_at = now;
                record
            }
            None => SubscriberRecord {
                subscriber_id: subscriber_id.clone(),
                push_endpoint: request.push_endpoint.trim().to_string(),
                push_keys: request.push_keys.clone(),
                preferences: request.preferences.clone(),
                subscribed_groups: groups,
                subscribed_keywords: keywords,
                last_notified_at: None,
                notification_count_in_window: 0,
                window_started_at: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.store.set_json_state(&record_key, &record).await?;
        self.sync_index(Index::Group, &subscriber_id, &old_groups, &record.subscribed_groups)
            .await?;
        self.sync_index(Index::Keyword, &subscriber_id, &old_keywords, &record.subscribed_keywords)
            .await?;

        tracing::info!(
            subscriber_id = %subscriber_id,
            groups = record.subscribed_groups.len(),
            keywords = record.subscribed_keywords.len(),
            "Subscriber registered."
        );
        Ok(record)
    }

    /// Removes a subscriber and every index entry it appears in. Unknown
    /// subscribers are ignored. Returns whether a record was removed.
    pub async fn unsubscribe(&self, subscriber_id: &str) -> Result<bool, RegistryError> {
        let subscriber_id = normalize_identifier(subscriber_id);
        let record_key = subscriber_key(&subscriber_id);
        let _guard = self.locks.lock(&record_key).await;

        let Some(record) = self.store.get_json_state::<SubscriberRecord>(&record_key).await?
        else {
            tracing::debug!(subscriber_id = %subscriber_id, "Unsubscribe for unknown subscriber ignored.");
            return Ok(false);
        };

        self.store.delete_json_state(&record_key).await?;
        for group in &record.subscribed_groups {
            self.remove_from_index(Index::Group, group, &subscriber_id).await?;
        }
        for keyword in &record.subscribed_keywords {
            self.remove_from_index(Index::Keyword, keyword, &subscriber_id).await?;
        }
        self.store.delete_json_state(&pending_key(&subscriber_id)).await?;

        tracing::info!(subscriber_id = %subscriber_id, "Subscriber removed.");
        Ok(true)
    }

    /// Applies a partial preference update. Group and keyword lists in the
    /// update replace the current sets and update the indices.
    pub async fn update_preferences(
        &self,
        subscriber_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<SubscriberRecord, RegistryError> {
        let subscriber_id = normalize_identifier(subscriber_id);
        let record_key = subscriber_key(&subscriber_id);
        let _guard = self.locks.lock(&record_key).await;

        let mut record = self
            .store
            .get_json_state::<SubscriberRecord>(&record_key)
            .await?
            .ok_or_else(|| RegistryError::NotFound(subscriber_id.clone()))?;

        let old_groups = record.subscribed_groups.clone();
        let old_keywords = record.subscribed_keywords.clone();

        record.preferences.apply(update);
        if let Some(groups) = &update.groups {
            record.subscribed_groups = normalize_groups(groups);
        }
        if let Some(keywords) = &update.keywords {
            record.subscribed_keywords = normalize_keywords(keywords);
        }
        record.updated_at = Utc::now();

        self.store.set_json_state(&record_key, &record).await?;
        self.sync_index(Index::Group, &subscriber_id, &old_groups, &record.subscribed_groups)
            .await?;
        self.sync_index(Index::Keyword, &subscriber_id, &old_keywords, &record.subscribed_keywords)
            .await?;

        tracing::debug!(subscriber_id = %subscriber_id, "Preferences updated.");
        Ok(record)
    }

    /// Fetches a subscriber record.
    pub async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberRecord>, RegistryError> {
        let subscriber_id = normalize_identifier(subscriber_id);
        Ok(self.store.get_json_state(&subscriber_key(&subscriber_id)).await?)
    }

    /// Returns true if the subscriber exists and is registered with exactly
    /// this endpoint.
    pub async fn check_subscription(
        &self,
        subscriber_id: &str,
        endpoint: &str,
    ) -> Result<bool, RegistryError> {
        Ok(self.get(subscriber_id).await?.is_some_and(|r| r.push_endpoint == endpoint.trim()))
    }

    /// Members of a group, reconciled against their records.
    pub async fn list_group_members(&self, group_id: &str) -> Result<Vec<String>, RegistryError> {
        self.read_index(Index::Group, group_id.trim()).await
    }

    /// Subscribers of a keyword (case-insensitive), reconciled against their
    /// records.
    pub async fn list_keyword_subscribers(
        &self,
        keyword: &str,
    ) -> Result<Vec<String>, RegistryError> {
        self.read_index(Index::Keyword, &keyword.trim().to_lowercase()).await
    }

    /// Every keyword with at least one subscriber.
    pub async fn list_keywords(&self) -> Result<Vec<String>, RegistryError> {
        let entries = self
            .store
            .get_all_json_states_by_prefix::<BTreeSet<String>>(KEYWORD_PREFIX)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(key, _)| identifier(&key, KEYWORD_PREFIX).to_string())
            .collect())
    }

    /// Every subscriber record, ordered by id.
    pub async fn list_all(&self) -> Result<Vec<SubscriberRecord>, RegistryError> {
        let records = self
            .store
            .get_all_json_states_by_prefix::<SubscriberRecord>(SUBSCRIBER_PREFIX)
            .await?;
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Subscriber id to subscribed groups, for administrative listing.
    pub async fn subscriptions_overview(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, RegistryError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|r| (r.subscriber_id, r.subscribed_groups.into_iter().collect()))
            .collect())
    }

    /// Number of subscribers, groups and keywords.
    pub async fn counts(&self) -> Result<RegistryCounts, RegistryError> {
        Ok(RegistryCounts {
            subscribers: self.store.count_by_prefix(SUBSCRIBER_PREFIX).await?,
            groups: self.store.count_by_prefix(GROUP_PREFIX).await?,
            keywords: self.store.count_by_prefix(KEYWORD_PREFIX).await?,
        })
    }

    /// Counts one enqueued notification against the subscriber's rate
    /// window. Missing subscribers are ignored.
    pub async fn record_notification(
        &self,
        subscriber_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), RegistryError> {
        let subscriber_id = normalize_identifier(subscriber_id);
        let record_key = subscriber_key(&subscriber_id);
        let _guard = self.locks.lock(&record_key).await;

        if let Some(mut record) =
            self.store.get_json_state::<SubscriberRecord>(&record_key).await?
        {
            record.register_notification(now, window);
            self.store.set_json_state(&record_key, &record).await?;
        }
        Ok(())
    }

    /// Rebuilds the group and keyword indices from the subscriber records.
    /// Returns the number of index entries written.
    pub async fn rebuild_indices(&self) -> Result<usize, RegistryError> {
        let records = self.list_all().await?;

        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut keywords: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for record in &records {
            for group in &record.subscribed_groups {
                groups.entry(group_key(group)).or_default().insert(record.subscriber_id.clone());
            }
            for keyword in &record.subscribed_keywords {
                keywords
                    .entry(keyword_key(keyword))
                    .or_default()
                    .insert(record.subscriber_id.clone());
            }
        }

        let mut written = 0;
        for (prefix, desired) in [(GROUP_PREFIX, groups), (KEYWORD_PREFIX, keywords)] {
            let existing =
                self.store.get_all_json_states_by_prefix::<BTreeSet<String>>(prefix).await?;
            for (key, _) in existing {
                if !desired.contains_key(&key) {
                    let _guard = self.locks.lock(&key).await;
                    self.store.delete_json_state(&key).await?;
                }
            }
            for (key, members) in desired {
                let _guard = self.locks.lock(&key).await;
                self.store.set_json_state(&key, &members).await?;
                written += 1;
            }
        }

        tracing::info!(subscribers = records.len(), entries = written, "Indices rebuilt.");
        Ok(written)
    }

    /// Adds and removes index memberships to go from `old` to `new`.
    async fn sync_index(
        &self,
        index: Index,
        subscriber_id: &str,
        old: &BTreeSet<String>,
        new: &BTreeSet<String>,
    ) -> Result<(), PersistenceError> {
        for value in new.difference(old) {
            self.add_to_index(index, value, subscriber_id).await?;
        }
        for value in old.difference(new) {
            self.remove_from_index(index, value, subscriber_id).await?;
        }
        Ok(())
    }

    async fn add_to_index(
        &self,
        index: Index,
        value: &str,
        subscriber_id: &str,
    ) -> Result<(), PersistenceError> {
        let key = index.key(value);
        let _guard = self.locks.lock(&key).await;

        let mut members =
            self.store.get_json_state::<BTreeSet<String>>(&key).await?.unwrap_or_default();
        if members.insert(subscriber_id.to_string()) {
            self.store.set_json_state(&key, &members).await?;
        }
        Ok(())
    }

    async fn remove_from_index(
        &self,
        index: Index,
        value: &str,
        subscriber_id: &str,
    ) -> Result<(), PersistenceError> {
        let key = index.key(value);
        let _guard = self.locks.lock(&key).await;

        let Some(mut members) = self.store.get_json_state::<BTreeSet<String>>(&key).await? else {
            return Ok(());
        };
        if members.remove(subscriber_id) {
            self.write_index_entry(&key, &members).await?;
        }
        Ok(())
    }

    /// Reads an index entry, dropping members whose record does not list
    /// `value` any more.
    async fn read_index(&self, index: Index, value: &str) -> Result<Vec<String>, RegistryError> {
        let key = index.key(value);
        let _guard = self.locks.lock(&key).await;

        let Some(members) = self.store.get_json_state::<BTreeSet<String>>(&key).await? else {
            return Ok(Vec::new());
        };

        let mut live = BTreeSet::new();
        for member in &members {
            let record =
                self.store.get_json_state::<SubscriberRecord>(&subscriber_key(member)).await?;
            if record.is_some_and(|r| index.lists(&r, value)) {
                live.insert(member.clone());
            }
        }

        if live.len() != members.len() {
            tracing::warn!(
                key = %key,
                stale = members.len() - live.len(),
                "Dropping stale index members."
            );
            self.write_index_entry(&key, &live).await?;
        }

        Ok(live.into_iter().collect())
    }

    async fn write_index_entry(
        &self,
        key: &str,
        members: &BTreeSet<String>,
    ) -> Result<(), PersistenceError> {
        if members.is_empty() {
            self.store.delete_json_state(key).await?;
        } else {
            self.store.set_json_state(key, members).await?;
        }
        Ok(())
    }
}

fn validate_request(subscriber_id: &str, request: &SubscriptionRequest) -> Result<(), RegistryError> {
    if subscriber_id.is_empty() {
        return Err(RegistryError::InvalidSubscription("subscriberId is required".to_string()));
    }
    if subscriber_id.contains(char::is_whitespace) {
        return Err(RegistryError::InvalidSubscription(
            "subscriberId must not contain whitespace".to_string(),
        ));
    }
    let endpoint = Url::parse(request.push_endpoint.trim()).map_err(|e| {
        RegistryError::InvalidSubscription(format!("pushEndpoint is not a valid URL: {e}"))
    })?;
    if !matches!(endpoint.scheme(), "https" | "http") {
        return Err(RegistryError::InvalidSubscription(
            "pushEndpoint must be an http(s) URL".to_string(),
        ));
    }
    if request.push_keys.p256dh.trim().is_empty() || request.push_keys.auth.trim().is_empty() {
        return Err(RegistryError::InvalidSubscription(
            "pushKeys.p256dh and pushKeys.auth are required".to_string(),
        ));
    }
    Ok(())
}

fn normalize_groups(groups: &[String]) -> BTreeSet<String> {
    groups.iter().map(|g| g.trim()).filter(|g| !g.is_empty()).map(str::to_string).collect()
}

fn normalize_keywords(keywords: &[String]) -> BTreeSet<String> {
    keywords.iter().map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()).collect()
}
