//! In-memory ring buffer of recent log entries, fed by a
//! `tracing_subscriber` layer and served by the `/logs` endpoint.

use std::{
    collections::VecDeque,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{
    Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

/// Number of entries kept in the buffer.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Severity of a buffered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl From<&Level> for LogLevel {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warn,
            Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// One buffered log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// The event message.
    pub message: String,
    /// Structured fields other than `message` and `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// The `error` field, if the event carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared handle to the ring buffer.
#[derive(Clone, Default)]
pub struct LogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogBuffer {
    /// Appends an entry, evicting the oldest one when full. A poisoned lock
    /// drops the entry.
    pub fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push_back(entry);
            while entries.len() > MAX_LOG_ENTRIES {
                entries.pop_front();
            }
        }
    }

    /// The newest `limit` entries, optionally restricted to one level,
    /// oldest first.
    pub fn get_logs(&self, level: Option<LogLevel>, limit: usize) -> Vec<LogEntry> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut selected: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|entry| level.is_none_or(|level| entry.level == level))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Every buffered entry, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|entries| entries.iter().cloned().collect()).unwrap_or_default()
    }

    /// Puts previously persisted entries in front of the current ones.
    pub fn restore(&self, persisted: Vec<LogEntry>) {
        if let Ok(mut entries) = self.entries.lock() {
            let current = std::mem::take(&mut *entries);
            entries.extend(persisted);
            entries.extend(current);
            while entries.len() > MAX_LOG_ENTRIES {
                entries.pop_front();
            }
        }
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A layer that records this crate's events at `min_level` or above
    /// into the buffer.
    pub fn layer(&self, min_level: Level) -> LogBufferLayer {
        LogBufferLayer { buffer: self.clone(), min_level }
    }
}

/// `tracing_subscriber` layer writing into a [`LogBuffer`].
pub struct LogBufferLayer {
    buffer: LogBuffer,
    min_level: Level,
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering in tracing: ERROR < WARN < INFO < DEBUG < TRACE.
        if *metadata.level() > self.min_level
            || !metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
        {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::from(metadata.level()),
            message: visitor.message.unwrap_or_default(),
            data: (!visitor.fields.is_empty()).then(|| Value::Object(visitor.fields)),
            error: visitor.error,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    error: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(value_to_string(value)),
            "error" => self.error = Some(value_to_string(value)),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}
