//! A builder for creating signed `Event` instances for testing.

use chrono::Utc;
use secp256k1::{Keypair, Message, Secp256k1};

use crate::models::{Event, Tag, kinds};

/// A builder for creating signed `Event` instances for testing.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    secret_key: [u8; 32],
    kind: u16,
    created_at: u64,
    tags: Vec<Tag>,
    content: String,
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self {
            secret_key: [1u8; 32],
            kind: kinds::TEXT_NOTE,
            created_at: Utc::now().timestamp() as u64,
            tags: Vec::new(),
            content: String::new(),
        }
    }
}

impl EventBuilder {
    /// Creates a new `EventBuilder` for a text note created now.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the event kind.
    pub fn kind(mut self, kind: u16) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the creation timestamp.
    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, parts: &[&str]) -> Self {
        self.tags.push(Tag::new(parts));
        self
    }

    /// Sets the content.
    pub fn content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Sets the author's secret key.
    pub fn secret_key(mut self, secret_key: [u8; 32]) -> Self {
        self.secret_key = secret_key;
        self
    }

    /// Hex x-only public key of the configured author.
    pub fn pubkey(&self) -> String {
        pubkey_hex(self.secret_key)
    }

    /// Builds the event with a correct id and Schnorr signature.
    pub fn sign(self) -> Event {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &self.secret_key)
            .expect("test secret key must be valid");
        let mut event = Event {
            id: String::new(),
            pubkey: hex::encode(keypair.x_only_public_key().0.serialize()),
            kind: self.kind,
            created_at: self.created_at,
            tags: self.tags,
            content: self.content,
            sig: String::new(),
        };
        let hash = event.compute_hash().expect("test event must serialize");
        let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(hash), &keypair);
        event.id = hex::encode(hash);
        event.sig = hex::encode(sig.as_ref());
        event
    }
}

/// Hex x-only public key for a secret key.
pub fn pubkey_hex(secret_key: [u8; 32]) -> String {
    let keypair = Keypair::from_seckey_slice(&Secp256k1::new(), &secret_key)
        .expect("test secret key must be valid");
    hex::encode(keypair.x_only_public_key().0.serialize())
}
