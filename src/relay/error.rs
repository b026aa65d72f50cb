use thiserror::Error;

/// Errors raised while talking to a single relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay URL could not be used.
    #[error("Invalid relay url '{0}'")]
    InvalidUrl(String),

    /// The WebSocket handshake failed or did not finish in time.
    #[error("Failed to connect to relay: {0}")]
    Connection(String),

    /// A frame could not be sent.
    #[error("Failed to send to relay: {0}")]
    Send(String),

    /// The connection broke before anything was received.
    #[error("Relay stream failed: {0}")]
    Stream(String),
}
