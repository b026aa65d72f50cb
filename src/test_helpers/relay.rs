//! An in-memory relay for tests that cannot use mocks.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    models::Event,
    relay::{RelayError, RelayFetch, RelayFilter, RelaySource},
};

/// Serves a fixed set of events per relay URL, honouring the filter's
/// `kinds`, `since`, `until` and `limit`. Like a real relay it returns the
/// newest matches first. Unknown URLs fail to connect.
#[derive(Debug, Clone, Default)]
pub struct StaticRelaySource {
    events: Arc<Mutex<HashMap<String, Vec<Event>>>>,
    fetches: Arc<Mutex<Vec<(String, RelayFilter)>>>,
}

impl StaticRelaySource {
    /// Creates a source that knows no relays.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `event` to the stored events of `relay_url`.
    pub fn publish(&self, relay_url: &str, event: Event) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.entry(relay_url.to_string()).or_default().push(event);
    }

    /// Registers `relay_url` with no stored events.
    pub fn add_relay(&self, relay_url: &str) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.entry(relay_url.to_string()).or_default();
    }

    /// Every fetch seen so far, in order.
    pub fn fetches(&self) -> Vec<(String, RelayFilter)> {
        self.fetches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RelaySource for StaticRelaySource {
    async fn fetch(&self, relay_url: &str, filter: &RelayFilter) -> Result<RelayFetch, RelayError> {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((relay_url.to_string(), filter.clone()));

        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let stored = events
            .get(relay_url)
            .ok_or_else(|| RelayError::Connection(format!("unknown relay {relay_url}")))?;
        let mut events: Vec<Event> = stored
            .iter()
            .filter(|e| filter.kinds.contains(&e.kind) && e.created_at >= filter.since)
            .filter(|e| filter.until.is_none_or(|until| e.created_at <= until))
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        events.truncate(filter.limit);
        Ok(RelayFetch { events, eose: true })
    }
}
