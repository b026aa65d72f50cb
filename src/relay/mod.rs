//! Relay access: a WebSocket client speaking the relay protocol and the
//! monitor that polls every configured relay once per tick.

pub mod client;
pub mod error;
pub mod message;
pub mod monitor;
pub mod traits;

pub use client::WsRelayClient;
pub use error::RelayError;
pub use message::RelayMessage;
pub use monitor::{PollReport, RelayMonitor, RelayPollOutcome, RelayPollStatus};
pub use traits::{RelayFetch, RelayFilter, RelaySource};
