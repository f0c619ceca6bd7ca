//! Deterministic JSON emission and content hashing.
//!
//! Reports written with `--json` are emitted as RFC 8785 canonical JSON so
//! two runs over the same inputs produce byte-identical output. Document
//! contents are fingerprinted with BLAKE3.

use anyhow::{Context, Result};
use blake3::Hasher;
use serde::Serialize;

/// Serialize `value` as canonical JSON (JCS, RFC 8785).
pub fn emit_jcs<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "Failed to serialize value to JSON")?;
    let json_bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "Failed to canonicalize JSON using JCS")?;
    String::from_utf8(json_bytes).with_context(|| "JCS output contained invalid UTF-8")
}

/// Full BLAKE3 hex digest of `content`.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// First eight hex characters of the BLAKE3 digest, used as a short
/// fingerprint in reports and logs.
#[must_use]
pub fn content_hash_first8(content: &str) -> String {
    let mut hash = content_hash(content);
    hash.truncate(8);
    hash
}
