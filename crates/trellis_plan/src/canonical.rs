//! Canonical JSON serialization and digests.
//!
//! Pre-hash normalization is the entire game: object keys sort, timestamps
//! render as fixed ISO-8601 UTC strings, UUIDs render as 36-character
//! strings, and floats that carry integral values render as integers.
//! Serializing through `serde_json::Value` (whose object map is ordered)
//! makes struct field order irrelevant to the digest.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Render any serializable value as canonical JSON text.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value)?;
    let normalized = normalize(value);
    Ok(serde_json::to_string(&normalized)?)
}

/// SHA-1 hex digest of a value's canonical JSON.
pub fn sha1_hex_of<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let text = canonical_json(value)?;
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Rebuild the value with sorted maps and normalized numbers.
fn normalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<String, JsonValue> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(normalize).collect())
        }
        JsonValue::Number(n) => {
            // 2.0 and 2 must hash identically.
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 && n.as_i64().is_none() {
                    return JsonValue::from(f as i64);
                }
            }
            JsonValue::Number(n)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(sha1_hex_of(&a).unwrap(), sha1_hex_of(&b).unwrap());
    }

    #[test]
    fn test_integral_float_normalizes() {
        let a = json!({"v": 2.0});
        let b = json!({"v": 2});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn test_digest_is_40_hex_chars() {
        let digest = sha1_hex_of(&json!({"key": "value"})).unwrap();
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(sha1_hex_of(&a).unwrap(), sha1_hex_of(&b).unwrap());
    }
}
