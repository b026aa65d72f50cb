//! Key layout of the state namespace. Every entity is addressable as
//! `<prefix><identifier>` so it can be listed and swept by prefix.

/// Subscriber records, keyed by subscriber id.
pub const SUBSCRIBER_PREFIX: &str = "subscriber:";
/// Group member sets, keyed by group id.
pub const GROUP_PREFIX: &str = "group:";
/// Keyword subscriber sets, keyed by lower-cased keyword.
pub const KEYWORD_PREFIX: &str = "keyword:";
/// Processed-event markers, keyed by event id.
pub const PROCESSED_PREFIX: &str = "processed:";
/// Per-relay watermarks, keyed by relay url.
pub const WATERMARK_PREFIX: &str = "watermark:";
/// Delivery queue items, keyed by item id.
pub const QUEUE_PREFIX: &str = "queue:";
/// Pending aggregation windows, keyed by subscriber id.
pub const PENDING_PREFIX: &str = "pending:";
/// Last persisted metrics snapshot.
pub const METRICS_SNAPSHOT_KEY: &str = "metrics:snapshot";
/// Last persisted log ring buffer.
pub const LOG_BUFFER_KEY: &str = "logs:buffer";

/// Key of a subscriber record.
pub fn subscriber_key(subscriber_id: &str) -> String {
    format!("{SUBSCRIBER_PREFIX}{subscriber_id}")
}

/// Key of a group member set.
pub fn group_key(group_id: &str) -> String {
    format!("{GROUP_PREFIX}{group_id}")
}

/// Key of a keyword subscriber set.
pub fn keyword_key(keyword: &str) -> String {
    format!("{KEYWORD_PREFIX}{keyword}")
}

/// Key of a processed-event marker.
pub fn processed_key(event_id: &str) -> String {
    format!("{PROCESSED_PREFIX}{event_id}")
}

/// Key of a relay watermark.
pub fn watermark_key(relay: &str) -> String {
    format!("{WATERMARK_PREFIX}{relay}")
}

/// Key of a queue item.
pub fn queue_key(item_id: &str) -> String {
    format!("{QUEUE_PREFIX}{item_id}")
}

/// Key of a pending aggregation window.
pub fn pending_key(subscriber_id: &str) -> String {
    format!("{PENDING_PREFIX}{subscriber_id}")
}

/// Strips `prefix` from a listed key, returning the identifier.
pub fn identifier<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}
