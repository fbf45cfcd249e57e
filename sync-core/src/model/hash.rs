//! Deterministic serialization and content hashing.
//!
//! The content hash must be reproducible across languages:
//! stable field ordering and well-defined numeric formatting. We rely on
//! `serde_json::Map` being backed by a `BTreeMap` (the `preserve_order`
//! feature is never enabled in this workspace), so any `Value::Object`
//! serializes with keys in sorted order for free; we additionally
//! normalize `-0` to `0` so two numerically-equal-but-differently-signed
//! zeros hash identically.

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;

/// Keys excluded from an entity's content hash.
const EXCLUDED_KEYS: &[&str] = &["hash", "ID", "kiid"];

/// Recursively normalize `-0.0`/`-0` to positive zero so the canonical
/// serialization never emits a stray minus sign on a zero value.
fn normalize_negative_zero(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f == 0.0 {
                    *n = serde_json::Number::from(0);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_negative_zero),
        Value::Object(map) => map.values_mut().for_each(normalize_negative_zero),
        _ => {}
    }
}

/// Serialize `value` to canonical (sorted-key, no insignificant whitespace,
/// no `-0`) JSON text.
pub fn canonical_json<T: Serialize>(value: &T) -> Value {
    let mut v = serde_json::to_value(value).expect("entity types always serialize to JSON");
    normalize_negative_zero(&mut v);
    v
}

/// The JSON value an entity's content hash is computed over: its
/// canonical serialization with `hash`, `ID`, and `kiid` removed.
pub fn content_value<T: Serialize>(entity: &T) -> Value {
    let mut v = canonical_json(entity);
    if let Value::Object(map) = &mut v {
        for key in EXCLUDED_KEYS {
            map.remove(*key);
        }
    }
    v
}

/// Hex-encoded MD5 digest of a canonical JSON value (compact, sorted keys).
pub fn digest_value(value: &Value) -> String {
    let text = serde_json::to_string(value).expect("canonical value always serializes");
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content hash of an entity, excluding `hash`/`ID`/`kiid`.
pub fn content_hash<T: Serialize>(entity: &T) -> String {
    digest_value(&content_value(entity))
}

/// Whole-document hash used for the post-sync consistency check.
pub fn board_hash<T: Serialize>(board: &T) -> String {
    digest_value(&canonical_json(board))
}
