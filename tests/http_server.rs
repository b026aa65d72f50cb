// Integration test root for http_server tests.
// Submodules live under `tests/http_server/` directory.

#[path = "http_server/helpers.rs"]
mod helpers;

#[path = "http_server/subscriptions.rs"]
mod subscriptions;

#[path = "http_server/notify.rs"]
mod notify;

#[path = "http_server/health.rs"]
mod health;
