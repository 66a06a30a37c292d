//! Payload codecs.
//!
//! The orchestrator never looks inside payload bytes; it hands values to a
//! [`Codec`] on the way in and out. [`JsonCodec`] is the default.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error raised by a codec. The orchestrator wraps it into
/// `CacheError::Encode` or `CacheError::Decode` with the key involved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Pluggable byte encoding for cached payloads.
pub trait Codec: Send + Sync {
    /// Encode a value to bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into the requested shape.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON payload encoding via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::FieldValues;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        email: String,
        age: u32,
    }

    #[test]
    fn test_json_codec_field_values() {
        let mut fields = FieldValues::new();
        fields.insert("email".to_string(), json!("a@x.com"));
        fields.insert("age".to_string(), json!(30));

        let bytes = JsonCodec.encode(&fields).unwrap();
        let decoded: FieldValues = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, fields);

        let typed: User = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(
            typed,
            User {
                email: "a@x.com".to_string(),
                age: 30
            }
        );
    }

    #[test]
    fn test_json_codec_shape_mismatch() {
        let bytes = JsonCodec.encode(&json!({"email": 5})).unwrap();
        let result: Result<User, _> = JsonCodec.decode(&bytes);
        assert!(result.is_err());
    }
}
