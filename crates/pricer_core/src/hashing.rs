//! Canonical JSON and content hashing.
//!
//! Snapshot ids and result `input_hash` values are SHA-256 digests of a
//! canonical JSON rendering: object keys sorted, no insignificant whitespace.
//! Two payloads that differ only in key order hash identically.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Render `value` as canonical JSON (sorted keys, compact).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(value)?);
    serde_json::to_string(&value)
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 of the canonical JSON rendering of `value`.
///
/// # Examples
///
/// ```
/// use pricer_core::hashing::content_hash;
/// use serde_json::json;
///
/// let a = content_hash(&json!({"x": 1, "y": 2})).unwrap();
/// let b = content_hash(&json!({"y": 2, "x": 1})).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
