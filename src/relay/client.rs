//! WebSocket relay client.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{Instant, timeout_at};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{
    error::RelayError,
    message::RelayMessage,
    traits::{RelayFetch, RelayFilter, RelaySource},
};

/// Fetches stored events over a fresh WebSocket connection per call.
#[derive(Debug, Clone)]
pub struct WsRelayClient {
    /// Budget for connecting and receiving until EOSE.
    timeout: Duration,
}

impl WsRelayClient {
    /// Creates a client whose fetches give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RelaySource for WsRelayClient {
    async fn fetch(
        &self,
        relay_url: &str,
        filter: &RelayFilter,
    ) -> Result<RelayFetch, RelayError> {
        let deadline = Instant::now() + self.timeout;

        let (mut ws, _) = match timeout_at(deadline, connect_async(relay_url)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(RelayError::Connection(e.to_string())),
            Err(_) => {
                return Err(RelayError::Connection(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let subscription_id = format!("herald-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let req = json!(["REQ", subscription_id, filter.to_json()]);
        ws.send(Message::Text(req.to_string())).await.map_err(|e| RelayError::Send(e.to_string()))?;

        let mut fetch = RelayFetch::default();
        loop {
            let frame = match timeout_at(deadline, ws.next()).await {
                Err(_) => {
                    tracing::debug!(relay = relay_url, received = fetch.events.len(), "Relay timed out before EOSE.");
                    break;
                }
                Ok(None) => {
                    tracing::debug!(relay = relay_url, "Relay closed the stream.");
                    break;
                }
                Ok(Some(Err(e))) => {
                    if fetch.events.is_empty() {
                        return Err(RelayError::Stream(e.to_string()));
                    }
                    tracing::warn!(relay = relay_url, error = %e, "Relay stream broke, keeping partial result.");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match RelayMessage::parse(&text) {
                Some(RelayMessage::Event { subscription_id: sub, event }) if sub == subscription_id => {
                    fetch.events.push(*event);
                }
                Some(RelayMessage::EndOfStoredEvents(sub)) if sub == subscription_id => {
                    fetch.eose = true;
                    break;
                }
                Some(RelayMessage::Closed { subscription_id: sub, reason }) if sub == subscription_id => {
                    tracing::warn!(relay = relay_url, reason = %reason, "Relay closed the subscription.");
                    break;
                }
                Some(RelayMessage::Notice(notice)) => {
                    tracing::debug!(relay = relay_url, notice = %notice, "Relay notice.");
                }
                Some(_) => {}
                None => {
                    tracing::debug!(relay = relay_url, "Ignoring undecodable relay frame.");
                }
            }
        }

        // Best effort: the relay drops the subscription with the socket anyway.
        let close = json!(["CLOSE", subscription_id]);
        if let Err(e) = ws.send(Message::Text(close.to_string())).await {
            tracing::debug!(relay = relay_url, error = %e, "Failed to send CLOSE.");
        }
        let _ = ws.close(None).await;

        Ok(fetch)
    }
}
