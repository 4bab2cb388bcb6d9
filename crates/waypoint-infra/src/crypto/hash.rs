//! SHA-256 content hashing for snapshot integrity verification.
//!
//! Snapshots are checksummed over a canonical JSON rendering: object keys
//! sorted at every level, no insignificant whitespace. Two documents with
//! the same content hash identically regardless of how they were formatted
//! on disk.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex-encoded SHA-256 digest of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{:x}", digest)
}

/// Checksum of `value` in canonical form.
pub fn canonical_checksum(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    sha256_hex(out.as_bytes())
}

/// Render `value` as compact JSON with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

// Sorts explicitly: if any crate in the build enables serde_json's
// `preserve_order`, `Map` iterates in insertion order and `to_string` stops
// being canonical.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}
