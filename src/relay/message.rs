//! Relay-to-client protocol messages.

use serde_json::Value;

use crate::models::Event;

/// A message received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `["EVENT", <sub>, <event>]`
    Event {
        /// Subscription the event belongs to.
        subscription_id: String,
        /// The (not yet verified) event.
        event: Box<Event>,
    },
    /// `["EOSE", <sub>]`
    EndOfStoredEvents(String),
    /// `["CLOSED", <sub>, <reason>]`
    Closed {
        /// Subscription closed by the relay.
        subscription_id: String,
        /// Machine-readable prefix and human message.
        reason: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// Anything else, including `OK` and `AUTH`.
    Other,
}

impl RelayMessage {
    /// Parses a text frame. Returns `None` when the frame is not a JSON
    /// array with a string label, or when an `EVENT` carries an event that
    /// does not decode.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let array = value.as_array()?;
        let label = array.first()?.as_str()?;
        let str_at = |i: usize| array.get(i).and_then(Value::as_str).map(str::to_string);

        let message = match label {
            "EVENT" => {
                let event = serde_json::from_value::<Event>(array.get(2)?.clone()).ok()?;
                RelayMessage::Event { subscription_id: str_at(1)?, event: Box::new(event) }
            }
            "EOSE" => RelayMessage::EndOfStoredEvents(str_at(1)?),
            "CLOSED" => RelayMessage::Closed {
                subscription_id: str_at(1)?,
                reason: str_at(2).unwrap_or_default(),
            },
            "NOTICE" => RelayMessage::Notice(str_at(1).unwrap_or_default()),
            _ => RelayMessage::Other,
        };
        Some(message)
    }
}
