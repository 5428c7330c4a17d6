//! Stable request and config fingerprints.
//!
//! Cache lookups and cassette replay both need a key that is identical for
//! semantically identical inputs, regardless of map iteration order or
//! optional fields. The functions here canonicalize arbitrary nested JSON
//! (object keys sorted lexicographically at every level), hash the canonical
//! form with SHA-256, and render the first 16 bytes as lowercase hex.
//!
//! # Example
//!
//! ```rust
//! use hexagon::fingerprint::fingerprint_value;
//! use serde_json::json;
//!
//! let a = fingerprint_value(&json!({"model": "m1", "temperature": 0.2}));
//! let b = fingerprint_value(&json!({"temperature": 0.2, "model": "m1"}));
//! assert_eq!(a, b);
//! assert_eq!(a.len(), 32);
//! ```

use crate::completer::Message;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Serialize a JSON value in canonical form: object keys are emitted in
/// lexicographic order at every nesting level so two structurally equal
/// values always produce the same byte sequence.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are serialized through serde_json so escaping matches
                // ordinary JSON output.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Hash a canonical byte sequence and render a 128-bit hex prefix.
fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Fingerprint an arbitrary JSON value. Key order never affects the result.
pub fn fingerprint_value(value: &Value) -> String {
    digest_hex(canonical_json(value).as_bytes())
}

/// Fingerprint an LLM request.
///
/// Only `(model, messages)` participate, so two requests that differ in
/// optional tuning fields still map to the same cassette entry.
pub fn request_fingerprint(model: &str, messages: &[Message]) -> String {
    fingerprint_value(&request_value(model, messages))
}

/// The canonical JSON request body used for fingerprinting and recording.
pub fn request_value(model: &str, messages: &[Message]) -> Value {
    let rendered: Vec<Value> = messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content.as_ref(),
            })
        })
        .collect();
    serde_json::json!({
        "model": model,
        "messages": rendered,
    })
}
