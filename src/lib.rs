#![warn(missing_docs)]
//! Herald watches Nostr relays and turns the events that concern its
//! subscribers into Web Push notifications.

pub mod config;
pub mod context;
pub mod delivery;
pub mod engine;
pub mod http_server;
pub mod locks;
pub mod models;
pub mod persistence;
pub mod push;
pub mod registry;
pub mod relay;
pub mod supervisor;
pub mod test_helpers;
