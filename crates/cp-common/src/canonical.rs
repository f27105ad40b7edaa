//! Canonical JSON serialization and payload hashing.
//!
//! Two byte-identical payloads must hash identically regardless of key
//! order in the input file, so deduplication survives re-serialization
//! by upstream log shippers. Objects are serialized with sorted keys;
//! arrays keep their order; numbers and strings use serde_json's
//! standard rendering.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Hex SHA-256 of the canonical serialization.
pub fn payload_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Hex SHA-256 of arbitrary bytes (cache keys, passwords, key data).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are strings; serde_json renders escaping for us.
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_invariant() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":3,"d":2},"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_array_order_preserved() {
        let a = json!({"k": [1, 2]});
        let b = json!({"k": [2, 1]});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn test_hash_shape() {
        let hash = payload_hash(&json!({"eventid": "cowrie.session.connect"}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_escaped_keys() {
        let value = json!({"a\"b": 1});
        assert_eq!(canonical_json(&value), r#"{"a\"b":1}"#);
    }
}
