//! Persistent state: a flat key-value namespace addressed by stable key
//! prefixes, backed by SQLite.

pub mod error;
pub mod keys;
pub mod sqlite;
pub use sqlite::SqliteStateRepository;
pub mod traits;
