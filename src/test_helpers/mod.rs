//! A set of helpers for testing

mod event;
mod relay;
mod subscriber;
mod transport;

pub use event::EventBuilder;
pub use relay::StaticRelaySource;
pub use subscriber::{create_test_repo, subscription_request};
pub use transport::{RecordedPush, RecordingPushTransport};
