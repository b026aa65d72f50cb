//! Typed parsing of Nostr tags.

use serde::{Deserialize, Serialize};

/// A raw tag: an array of strings whose first element names the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Builds a tag from string slices.
    pub fn new(parts: &[&str]) -> Self {
        Self(parts.iter().map(|p| p.to_string()).collect())
    }

    /// The tag name (first element).
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The element at `index`, treating empty strings as absent.
    fn value(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// The tag shapes the pipeline understands. Anything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTag {
    /// `["p", <pubkey>, <relay>?]`
    Pubkey { pubkey: String, relay: Option<String> },
    /// `["a", "<kind>:<pubkey>:<identifier>"]`
    Address { kind: u16, pubkey: String, identifier: String },
    /// `["h", <group id>]`
    Group { id: String },
    /// `["e", <event id>, <relay>?, <marker>?]`
    Event { id: String, relay: Option<String>, marker: Option<String> },
    /// Unknown or malformed tag.
    Other,
}

impl EventTag {
    /// Parses a raw tag. Malformed known tags degrade to `Other`.
    pub fn parse(tag: &Tag) -> Self {
        match tag.name() {
            Some("p") => match tag.value(1) {
                Some(pubkey) => EventTag::Pubkey {
                    pubkey: pubkey.to_ascii_lowercase(),
                    relay: tag.value(2).map(str::to_string),
                },
                None => EventTag::Other,
            },
            Some("a") => tag.value(1).and_then(parse_address).unwrap_or(EventTag::Other),
            Some("h") => match tag.value(1) {
                Some(id) => EventTag::Group { id: id.to_string() },
                None => EventTag::Other,
            },
            Some("e") => match tag.value(1) {
                Some(id) => EventTag::Event {
                    id: id.to_ascii_lowercase(),
                    relay: tag.value(2).map(str::to_string),
                    marker: tag.value(3).map(str::to_string),
                },
                None => EventTag::Other,
            },
            _ => EventTag::Other,
        }
    }
}

fn parse_address(value: &str) -> Option<EventTag> {
    let mut parts = value.splitn(3, ':');
    let kind = parts.next()?.parse::<u16>().ok()?;
    let pubkey = parts.next()?.to_string();
    let identifier = parts.next()?.to_string();
    Some(EventTag::Address { kind, pubkey, identifier })
}
