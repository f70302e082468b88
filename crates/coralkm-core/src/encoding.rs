//! Encoding helpers: base64url and canonical JSON
//!
//! All binary payloads cross the wire as unpadded base64url. Associated-data
//! objects are serialized to canonical JSON (object keys in lexicographic
//! order) so that encrypt- and decrypt-side context objects compare
//! byte-for-byte.

use crate::{CoralError, Result};
use base64::Engine;
use serde::Serialize;

/// Encode bytes as unpadded base64url.
pub fn b64url_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url into bytes.
pub fn b64url_decode(value: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CoralError::invalid_argument(format!("invalid base64url: {e}")))
}

/// Serialize a value to canonical JSON bytes.
///
/// Routes through `serde_json::Value`, whose object representation keeps keys
/// sorted lexicographically at every nesting level.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| CoralError::internal(format!("canonical serialization failed: {e}")))?;
    serde_json::to_vec(&value)
        .map_err(|e| CoralError::internal(format!("canonical serialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[test]
    fn b64url_roundtrip() {
        let bytes = vec![0u8, 1, 2, 253, 254, 255];
        let encoded = b64url_encode(&bytes);
        assert!(!encoded.contains('='));
        assert_eq!(b64url_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn b64url_rejects_garbage() {
        assert!(b64url_decode("not base64url!!").is_err());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        #[derive(Serialize)]
        struct Unordered {
            zebra: u8,
            apple: u8,
            mango: u8,
        }
        let bytes = canonical_json(&Unordered {
            zebra: 1,
            apple: 2,
            mango: 3,
        })
        .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":2,"mango":3,"zebra":1}"#
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = serde_json::json!({"b": {"y": 1, "x": 2}, "a": 3});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":3,"b":{"x":2,"y":1}}"#
        );
    }
}
