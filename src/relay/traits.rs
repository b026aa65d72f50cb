use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::error::RelayError;
use crate::models::Event;

/// The subscription filter sent with a `REQ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFilter {
    /// Kinds of interest.
    pub kinds: Vec<u16>,
    /// Only events created at or after this unix timestamp.
    pub since: u64,
    /// Only events created at or before this unix timestamp.
    pub until: Option<u64>,
    /// Upper bound on stored events returned. Relays return the newest
    /// matches first.
    pub limit: usize,
}

impl RelayFilter {
    /// The filter as a relay protocol JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut filter = serde_json::json!({
            "kinds": self.kinds,
            "since": self.since,
            "limit": self.limit,
        });
        if let Some(until) = self.until {
            filter["until"] = until.into();
        }
        filter
    }
}

/// Result of one fetch against one relay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayFetch {
    /// Events received, in arrival order.
    pub events: Vec<Event>,
    /// True if the relay signalled end-of-stored-events before the timeout.
    pub eose: bool,
}

/// A source of stored events, one relay at a time.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RelaySource: Send + Sync {
    /// Subscribes with `filter`, collects stored events until EOSE or the
    /// source's timeout, then closes the subscription. A timeout yields a
    /// partial result with `eose == false`, not an error.
    async fn fetch(&self, relay_url: &str, filter: &RelayFilter)
    -> Result<RelayFetch, RelayError>;
}
