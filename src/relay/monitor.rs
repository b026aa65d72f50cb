//! Polls every relay once per tick and commits per-relay watermarks.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use url::Url;

use super::traits::{RelayFilter, RelaySource};
use crate::{models::Event, persistence::traits::EventStore};

/// How a single relay poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPollStatus {
    /// EOSE received; the watermark now stands at the contained value.
    Complete {
        /// Committed watermark.
        watermark: u64,
    },
    /// The relay did not reach EOSE in time; the watermark was kept.
    TimedOut,
    /// The relay could not be polled.
    Failed(String),
}

/// Outcome of polling one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPollOutcome {
    /// Relay url.
    pub relay: String,
    /// Number of events the relay returned (before dedup).
    pub fetched: usize,
    /// How the poll ended.
    pub status: RelayPollStatus,
}

/// Deduplicated events of one polling pass plus per-relay outcomes.
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    /// Union of all relays' events, unique by id, oldest first.
    pub events: Vec<Event>,
    /// One entry per configured relay.
    pub relays: Vec<RelayPollOutcome>,
}

/// Watches a fixed set of relays.
pub struct RelayMonitor<S: EventStore + ?Sized, R: RelaySource + ?Sized> {
    store: Arc<S>,
    source: Arc<R>,
    relays: Vec<Url>,
    kinds: Vec<u16>,
    limit: usize,
    initial_lookback: Duration,
}

impl<S: EventStore + ?Sized, R: RelaySource + ?Sized> RelayMonitor<S, R> {
    /// Creates a monitor over `relays`.
    pub fn new(
        store: Arc<S>,
        source: Arc<R>,
        relays: Vec<Url>,
        kinds: Vec<u16>,
        limit: usize,
        initial_lookback: Duration,
    ) -> Self {
        Self { store, source, relays, kinds, limit, initial_lookback }
    }

    /// Polls all relays concurrently. `now` is the current unix time.
    pub async fn poll(&self, now: u64) -> PollReport {
        let polls = self.relays.iter().map(|relay| self.poll_relay(relay.as_str(), now));
        let results = join_all(polls).await;

        let mut seen = HashSet::new();
        let mut report = PollReport::default();
        for (outcome, events) in results {
            for event in events {
                if seen.insert(event.id.to_ascii_lowercase()) {
                    report.events.push(event);
                }
            }
            report.relays.push(outcome);
        }
        report.events.sort_by_key(|e| e.created_at);

        tracing::info!(
            relays = report.relays.len(),
            events = report.events.len(),
            "Relay poll completed."
        );
        report
    }

    /// Fetches everything newer than the relay's watermark. Relays answer a
    /// limited filter with the newest matches, so a full page is followed by
    /// another one ending at the oldest timestamp seen, until a short page
    /// shows the window is exhausted.
    async fn poll_relay(&self, relay: &str, now: u64) -> (RelayPollOutcome, Vec<Event>) {
        let outcome = |fetched, status| RelayPollOutcome { relay: relay.to_string(), fetched, status };

        let since = match self.store.get_watermark(relay).await {
            Ok(Some(watermark)) => watermark,
            Ok(None) => now.saturating_sub(self.initial_lookback.as_secs()),
            Err(e) => {
                tracing::error!(relay, error = %e, "Failed to read relay watermark.");
                return (outcome(0, RelayPollStatus::Failed(e.to_string())), Vec::new());
            }
        };

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut until = None;
        let mut pages = 0;
        loop {
            let filter = RelayFilter { kinds: self.kinds.clone(), since, until, limit: self.limit };
            let fetch = match self.source.fetch(relay, &filter).await {
                Ok(fetch) => fetch,
                Err(e) => {
                    tracing::warn!(relay, pages, error = %e, "Relay poll failed.");
                    let fetched = events.len();
                    return (outcome(fetched, RelayPollStatus::Failed(e.to_string())), events);
                }
            };
            pages += 1;

            let page_len = fetch.events.len();
            let oldest = fetch.events.iter().map(|e| e.created_at).min();
            for event in fetch.events {
                if seen.insert(event.id.to_ascii_lowercase()) {
                    events.push(event);
                }
            }

            if !fetch.eose {
                let fetched = events.len();
                tracing::warn!(relay, fetched, "Relay timed out before EOSE, watermark kept.");
                return (outcome(fetched, RelayPollStatus::TimedOut), events);
            }
            if page_len < self.limit.max(1) {
                break;
            }

            let Some(oldest) = oldest else { break };
            // A full page within one second cannot be split further.
            let next = match until {
                Some(previous) if oldest >= previous => {
                    tracing::warn!(relay, second = previous, limit = self.limit, "Full page within one second, skipping the rest of it.");
                    previous.saturating_sub(1)
                }
                _ => oldest,
            };
            if next < since {
                break;
            }
            until = Some(next);
        }

        let fetched = events.len();
        // Future-dated events must not push the watermark past the present.
        let newest = events.iter().map(|e| e.created_at.min(now)).max().unwrap_or(since);
        let watermark = newest.max(since);
        if let Err(e) = self.store.advance_watermark(relay, watermark).await {
            tracing::error!(relay, error = %e, "Failed to commit relay watermark.");
            return (outcome(fetched, RelayPollStatus::Failed(e.to_string())), events);
        }

        tracing::debug!(relay, fetched, pages, watermark, "Relay poll complete.");
        (outcome(fetched, RelayPollStatus::Complete { watermark }), events)
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::{
        persistence::{error::PersistenceError, traits::MockEventStore},
        relay::{error::RelayError, traits::{MockRelaySource, RelayFetch}},
        test_helpers::EventBuilder,
    };

    const NOW: u64 = 1_700_000_000;

    fn relays() -> Vec<Url> {
        vec![Url::parse("wss://a.example").unwrap(), Url::parse("wss://b.example").unwrap()]
    }

    fn monitor(
        store: MockEventStore,
        source: MockRelaySource,
    ) -> RelayMonitor<MockEventStore, MockRelaySource> {
        RelayMonitor::new(
            Arc::new(store),
            Arc::new(source),
            relays(),
            vec![1],
            100,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_dedups_across_relays_and_commits_watermarks() {
        let shared = EventBuilder::new().created_at(NOW - 50).content("shared").sign();
        let only_b = EventBuilder::new().created_at(NOW - 10).content("b").sign();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store
            .expect_advance_watermark()
            .with(eq("wss://a.example/"), eq(NOW - 50))
            .times(1)
            .returning(|_, _| Ok(true));
        store
            .expect_advance_watermark()
            .with(eq("wss://b.example/"), eq(NOW - 10))
            .times(1)
            .returning(|_, _| Ok(true));

        let mut source = MockRelaySource::new();
        let (a_events, b_events) =
            (vec![shared.clone()], vec![only_b.clone(), shared.clone()]);
        source.expect_fetch().returning(move |relay, filter| {
            assert_eq!(filter.since, NOW - 100);
            let events = if relay.contains("a.example") { a_events.clone() } else { b_events.clone() };
            Ok(RelayFetch { events, eose: true })
        });

        let report = monitor(store, source).poll(NOW).await;
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.events[0].id, shared.id);
        assert_eq!(report.events[1].id, only_b.id);
        assert!(report.relays.iter().all(|r| matches!(r.status, RelayPollStatus::Complete { .. })));
    }

    #[tokio::test]
    async fn test_failed_relay_does_not_block_others() {
        let event = EventBuilder::new().created_at(NOW - 5).sign();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(None));
        store.expect_advance_watermark().times(1).returning(|_, _| Ok(true));

        let mut source = MockRelaySource::new();
        let events = vec![event.clone()];
        source.expect_fetch().returning(move |relay, filter| {
            assert_eq!(filter.since, NOW - 3600);
            if relay.contains("a.example") {
                Err(RelayError::Connection("refused".into()))
            } else {
                Ok(RelayFetch { events: events.clone(), eose: true })
            }
        });

        let report = monitor(store, source).poll(NOW).await;
        assert_eq!(report.events.len(), 1);
        assert!(matches!(report.relays[0].status, RelayPollStatus::Failed(_)));
        assert_eq!(report.relays[1].status, RelayPollStatus::Complete { watermark: NOW - 5 });
    }

    #[tokio::test]
    async fn test_timeout_keeps_watermark_but_returns_events() {
        let event = EventBuilder::new().created_at(NOW - 5).sign();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store.expect_advance_watermark().never();

        let mut source = MockRelaySource::new();
        let events = vec![event.clone()];
        source
            .expect_fetch()
            .returning(move |_, _| Ok(RelayFetch { events: events.clone(), eose: false }));

        let report = monitor(store, source).poll(NOW).await;
        assert_eq!(report.events.len(), 1);
        assert!(report.relays.iter().all(|r| r.status == RelayPollStatus::TimedOut));
    }

    #[tokio::test]
    async fn test_empty_eose_commits_unchanged_watermark_and_clamps_future() {
        let future = EventBuilder::new().created_at(NOW + 10_000).sign();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store
            .expect_advance_watermark()
            .with(eq("wss://a.example/"), eq(NOW))
            .returning(|_, _| Ok(true));
        store
            .expect_advance_watermark()
            .with(eq("wss://b.example/"), eq(NOW - 100))
            .returning(|_, _| Ok(false));

        let mut source = MockRelaySource::new();
        let events = vec![future];
        source.expect_fetch().returning(move |relay, _| {
            let events = if relay.contains("a.example") { events.clone() } else { Vec::new() };
            Ok(RelayFetch { events, eose: true })
        });

        let report = monitor(store, source).poll(NOW).await;
        assert_eq!(report.relays[0].status, RelayPollStatus::Complete { watermark: NOW });
        assert_eq!(report.relays[1].status, RelayPollStatus::Complete { watermark: NOW - 100 });
    }

    /// Answers like a relay holding `stored`: newest first, capped at the
    /// filter's limit.
    fn paging_source(stored: Vec<Event>, expected_pages: usize) -> MockRelaySource {
        let mut source = MockRelaySource::new();
        source.expect_fetch().times(expected_pages).returning(move |_, filter| {
            let mut page: Vec<Event> = stored
                .iter()
                .filter(|e| e.created_at >= filter.since)
                .filter(|e| filter.until.is_none_or(|until| e.created_at <= until))
                .cloned()
                .collect();
            page.sort_by_key(|e| std::cmp::Reverse(e.created_at));
            page.truncate(filter.limit);
            Ok(RelayFetch { events: page, eose: true })
        });
        source
    }

    fn single_relay_monitor(
        store: MockEventStore,
        source: MockRelaySource,
        limit: usize,
    ) -> RelayMonitor<MockEventStore, MockRelaySource> {
        RelayMonitor::new(
            Arc::new(store),
            Arc::new(source),
            vec![Url::parse("wss://a.example").unwrap()],
            vec![1],
            limit,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_full_page_is_followed_by_older_pages() {
        let stored: Vec<Event> = [50, 40, 30, 20]
            .iter()
            .map(|age| EventBuilder::new().created_at(NOW - age).content(&format!("{age}")).sign())
            .collect();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store
            .expect_advance_watermark()
            .with(eq("wss://a.example/"), eq(NOW - 20))
            .times(1)
            .returning(|_, _| Ok(true));

        // Ages per page: 20 and 30, 30 and 40, 40 and 50, then 50 alone.
        let source = paging_source(stored.clone(), 4);

        let report = single_relay_monitor(store, source, 2).poll(NOW).await;
        assert_eq!(report.events.len(), 4);
        assert_eq!(report.events[0].id, stored[0].id);
        assert_eq!(report.relays[0].fetched, 4);
        assert_eq!(report.relays[0].status, RelayPollStatus::Complete { watermark: NOW - 20 });
    }

    #[tokio::test]
    async fn test_short_page_needs_no_second_request() {
        let stored = vec![EventBuilder::new().created_at(NOW - 5).sign()];

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store.expect_advance_watermark().times(1).returning(|_, _| Ok(true));

        let report = single_relay_monitor(store, paging_source(stored, 1), 2).poll(NOW).await;
        assert_eq!(report.events.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_on_a_later_page_keeps_watermark() {
        let newest = EventBuilder::new().created_at(NOW - 10).sign();
        let older = EventBuilder::new().created_at(NOW - 20).sign();

        let mut store = MockEventStore::new();
        store.expect_get_watermark().returning(|_| Ok(Some(NOW - 100)));
        store.expect_advance_watermark().never();

        let mut source = MockRelaySource::new();
        let (first, second) = (vec![newest.clone()], vec![older.clone()]);
        source.expect_fetch().times(2).returning(move |_, filter| match filter.until {
            None => Ok(RelayFetch { events: first.clone(), eose: true }),
            Some(until) => {
                assert_eq!(until, NOW - 10);
                Ok(RelayFetch { events: second.clone(), eose: false })
            }
        });

        let report = single_relay_monitor(store, source, 1).poll(NOW).await;
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.relays[0].status, RelayPollStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_watermark_read_failure_is_isolated() {
        let mut store = MockEventStore::new();
        store
            .expect_get_watermark()
            .returning(|_| Err(PersistenceError::OperationFailed("db locked".into())));
        let mut source = MockRelaySource::new();
        source.expect_fetch().never();

        let report = monitor(store, source).poll(NOW).await;
        assert!(report.events.is_empty());
        assert!(report.relays.iter().all(|r| matches!(r.status, RelayPollStatus::Failed(_))));
    }
}
