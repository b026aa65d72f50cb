//! Nostr event model and signature verification.

use secp256k1::{Message, SECP256K1, XOnlyPublicKey, schnorr::Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::tag::{EventTag, Tag};

/// Event kinds the pipeline cares about.
pub mod kinds {
    /// Short text note.
    pub const TEXT_NOTE: u16 = 1;
    /// Reaction to another event.
    pub const REACTION: u16 = 7;
    /// Post inside a group.
    pub const GROUP_POST: u16 = 11;
    /// Threaded comment.
    pub const COMMENT: u16 = 1111;
    /// Community post approval issued by a moderator.
    pub const COMMUNITY_APPROVAL: u16 = 4550;
    /// First group administration kind (put user, remove user, ...).
    pub const GROUP_ADMIN_START: u16 = 9000;
    /// Last group administration kind.
    pub const GROUP_ADMIN_END: u16 = 9020;
    /// Community definition, referenced by `a` tags.
    pub const COMMUNITY_DEFINITION: u16 = 34550;

    /// Returns true for kinds that represent a moderation action.
    pub fn is_moderation(kind: u16) -> bool {
        kind == COMMUNITY_APPROVAL || (GROUP_ADMIN_START..=GROUP_ADMIN_END).contains(&kind)
    }
}

/// Kinds requested from relays when none are configured.
pub fn default_watched_kinds() -> Vec<u16> {
    let mut watched = vec![
        kinds::TEXT_NOTE,
        kinds::REACTION,
        kinds::GROUP_POST,
        kinds::COMMENT,
        kinds::COMMUNITY_APPROVAL,
    ];
    watched.extend(kinds::GROUP_ADMIN_START..=kinds::GROUP_ADMIN_END);
    watched
}

/// Reasons an event is rejected before classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventValidationError {
    /// The id does not match the hash of the event's canonical form.
    #[error("event id does not match its content hash (expected {expected})")]
    IdMismatch {
        /// The recomputed id.
        expected: String,
    },

    /// A hex-encoded field could not be decoded.
    #[error("malformed hex in field '{field}'")]
    MalformedHex {
        /// The offending field.
        field: &'static str,
    },

    /// The author key is not a valid x-only public key.
    #[error("invalid author public key: {0}")]
    InvalidPublicKey(String),

    /// The Schnorr signature does not verify against the author key.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The canonical form could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialization(String),
}

/// A signed Nostr event as served by relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Kind number.
    pub kind: u16,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Raw tags.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Recomputes the event hash from the canonical
    /// `[0, pubkey, created_at, kind, tags, content]` serialization.
    pub fn compute_hash(&self) -> Result<[u8; 32], EventValidationError> {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let data = serde_json::to_vec(&canonical)
            .map_err(|e| EventValidationError::Serialization(e.to_string()))?;
        Ok(Sha256::digest(&data).into())
    }

    /// Checks the id against the content hash and the signature against the
    /// author key.
    pub fn verify(&self) -> Result<(), EventValidationError> {
        let hash = self.compute_hash()?;
        let expected = hex::encode(hash);
        if !expected.eq_ignore_ascii_case(&self.id) {
            return Err(EventValidationError::IdMismatch { expected });
        }

        let sig_bytes =
            hex::decode(&self.sig).map_err(|_| EventValidationError::MalformedHex { field: "sig" })?;
        let pk_bytes = hex::decode(&self.pubkey)
            .map_err(|_| EventValidationError::MalformedHex { field: "pubkey" })?;

        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|e| EventValidationError::InvalidSignature(e.to_string()))?;
        let pk = XOnlyPublicKey::from_slice(&pk_bytes)
            .map_err(|e| EventValidationError::InvalidPublicKey(e.to_string()))?;
        let msg = Message::from_digest(hash);

        SECP256K1
            .verify_schnorr(&sig, &msg, &pk)
            .map_err(|e| EventValidationError::InvalidSignature(e.to_string()))
    }

    /// Typed view over the event's tags.
    pub fn parsed_tags(&self) -> impl Iterator<Item = EventTag> + '_ {
        self.tags.iter().map(EventTag::parse)
    }

    /// Public keys explicitly addressed through `p` tags, in tag order.
    pub fn tagged_pubkeys(&self) -> Vec<String> {
        self.parsed_tags()
            .filter_map(|tag| match tag {
                EventTag::Pubkey { pubkey, .. } => Some(pubkey),
                _ => None,
            })
            .collect()
    }

    /// The group this event was posted to, taken from the first community
    /// address (`a` tag of kind 34550) or group (`h`) tag.
    pub fn group_id(&self) -> Option<String> {
        self.parsed_tags().find_map(|tag| match tag {
            EventTag::Address { kind, identifier, .. }
                if kind == kinds::COMMUNITY_DEFINITION && !identifier.is_empty() =>
            {
                Some(identifier)
            }
            EventTag::Group { id } => Some(id),
            _ => None,
        })
    }

    /// The full community coordinate (`34550:<owner>:<identifier>`) of the
    /// first community `a` tag. Unlike [`Event::group_id`] it tells apart
    /// communities of different owners that share an identifier.
    pub fn group_address(&self) -> Option<String> {
        self.parsed_tags().find_map(|tag| match tag {
            EventTag::Address { kind, pubkey, identifier }
                if kind == kinds::COMMUNITY_DEFINITION && !identifier.is_empty() =>
            {
                Some(format!("{kind}:{}:{identifier}", pubkey.to_ascii_lowercase()))
            }
            _ => None,
        })
    }

    /// For a reaction, the reacted-to event id and its author. By convention
    /// the last `e` and `p` tags point at the target.
    pub fn reaction_target(&self) -> Option<(String, String)> {
        if self.kind != kinds::REACTION {
            return None;
        }
        let mut target_event = None;
        let mut target_author = None;
        for tag in self.parsed_tags() {
            match tag {
                EventTag::Event { id, .. } => target_event = Some(id),
                EventTag::Pubkey { pubkey, .. } => target_author = Some(pubkey),
                _ => {}
            }
        }
        Some((target_event?, target_author?))
    }
}
