//! Public key identifiers: hex and `npub` bech32 forms.

use bech32::{Bech32, Hrp};

const NPUB_HRP: &str = "npub";
const NPROFILE_HRP: &str = "nprofile";

/// Decodes an `npub1...` string into its 32 raw key bytes.
pub fn decode_npub(encoded: &str) -> Option<[u8; 32]> {
    let (hrp, data) = bech32::decode(encoded).ok()?;
    if hrp != Hrp::parse(NPUB_HRP).ok()? {
        return None;
    }
    data.try_into().ok()
}

/// Decodes an `nprofile1...` string and returns the public key from its
/// TLV entry of type 0.
pub fn decode_nprofile(encoded: &str) -> Option<[u8; 32]> {
    let (hrp, data) = bech32::decode(encoded).ok()?;
    if hrp != Hrp::parse(NPROFILE_HRP).ok()? {
        return None;
    }
    let mut rest = data.as_slice();
    while rest.len() >= 2 {
        let (kind, len) = (rest[0], rest[1] as usize);
        let value = rest.get(2..2 + len)?;
        if kind == 0 {
            return value.try_into().ok();
        }
        rest = &rest[2 + len..];
    }
    None
}

/// Encodes raw key bytes as `npub1...`.
pub fn encode_npub(key: &[u8; 32]) -> Option<String> {
    let hrp = Hrp::parse(NPUB_HRP).ok()?;
    bech32::encode::<Bech32>(hrp, key).ok()
}

/// Normalizes a subscriber or author identifier: `npub` keys and 64-char hex
/// keys become lowercase hex; anything else is returned trimmed and
/// unchanged.
pub fn normalize_identifier(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("npub1") {
        if let Some(bytes) = decode_npub(trimmed) {
            return hex::encode(bytes);
        }
    }
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return trimmed.to_ascii_lowercase();
    }
    trimmed.to_string()
}

/// Extracts the public keys referenced with `nostr:npub1...`,
/// `nostr:nprofile1...` or bare `nostr:<hex>` URIs inside free text, as
/// lowercase hex.
pub fn content_pubkey_references(content: &str) -> Vec<String> {
    let mut references = Vec::new();
    let mut search_from = 0;

    while let Some(start) = content[search_from..].find("nostr:") {
        let entity_start = search_from + start + "nostr:".len();
        let entity_len = content[entity_start..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(content.len() - entity_start);
        let entity = &content[entity_start..entity_start + entity_len];

        let key = if entity.starts_with("npub1") {
            decode_npub(entity)
        } else if entity.starts_with("nprofile1") {
            decode_nprofile(entity)
        } else if entity.len() == 64 {
            hex::decode(entity).ok().and_then(|bytes| bytes.try_into().ok())
        } else {
            None
        };
        if let Some(key) = key {
            let hex_key = hex::encode(key);
            if !references.contains(&hex_key) {
                references.push(hex_key);
            }
        }

        search_from = entity_start + entity_len;
    }

    references
}
