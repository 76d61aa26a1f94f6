//! Identity hashing.
//!
//! The identity of a mail is a SHA-224 digest of its serialized canonical
//! headers, optionally extended with a digest of its body. Collision
//! resistance matters more than speed here: a false merge destroys mail.

use sha2::{Digest, Sha224};

use crate::config::{BodyHash, Config};
use crate::error::{DedupError, Result, MINIMAL_HEADERS_COUNT};
use crate::model::message::Message;

/// Compute the identity key a mail is grouped under.
///
/// Fails with [`DedupError::TooFewHeaders`] when the canonical header list is
/// too small to be a reliable signal.
pub fn identity_hash(mail: &Message, conf: &Config) -> Result<String> {
    let mut key = header_hash(mail)?;
    match conf.hash_body {
        BodyHash::Skip => {}
        BodyHash::Raw => key.push_str(&raw_body_hash(mail)),
        BodyHash::Normalized => key.push_str(&normalized_body_hash(mail)),
    }
    Ok(key)
}

/// Hex digest of the serialized canonical headers.
pub fn header_hash(mail: &Message) -> Result<String> {
    Ok(hex_digest(serialized_headers(mail)?.as_bytes()))
}

/// Serialize the canonical headers as newline-joined `name: value` lines.
pub fn serialized_headers(mail: &Message) -> Result<String> {
    let found = mail.canonical_headers().len();
    if found < MINIMAL_HEADERS_COUNT {
        return Err(DedupError::TooFewHeaders { found });
    }
    Ok(mail
        .canonical_headers()
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Hex digest of the body lines as decoded.
pub fn raw_body_hash(mail: &Message) -> String {
    hex_digest(mail.body_lines().concat().as_bytes())
}

/// Hex digest of the body with all whitespace stripped from every line.
///
/// Robust against reflow and list-footer differences, at the price of
/// merging near-duplicates.
pub fn normalized_body_hash(mail: &Message) -> String {
    let normalized: String = mail
        .body_lines()
        .iter()
        .map(|line| {
            line.chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
        })
        .collect();
    hex_digest(normalized.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha224::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
