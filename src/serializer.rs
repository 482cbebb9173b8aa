//! Key and value codecs.
//!
//! Every key and value stored in the backend passes through a [`Codec`]:
//! - [`Codec::Text`]: UTF-8 text for simple string (or numeric) keys
//! - [`Codec::Binary`]: bincode object graphs for arbitrary values
//! - [`Codec::Compressed`]: bincode followed by zstd, for large values
//!
//! A zero-length byte sequence is the encoding of "nothing". Decoding never
//! fails loudly: corrupt or incompatible bytes come back as absent.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};

/// Codec selection as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    Text,
    #[default]
    Binary,
    Zstd,
}

/// A byte codec for keys or values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Text,
    Binary,
    Compressed { level: i32 },
}

impl Codec {
    pub fn from_kind(kind: CodecKind, compression_level: i32) -> Self {
        match kind {
            CodecKind::Text => Codec::Text,
            CodecKind::Binary => Codec::Binary,
            CodecKind::Zstd => Codec::Compressed {
                level: compression_level,
            },
        }
    }

    /// Encode an optional value. `None` encodes to zero bytes.
    pub fn encode_opt<T: Serialize + ?Sized>(&self, value: Option<&T>) -> Result<Bytes> {
        match value {
            Some(value) => self.encode(value),
            None => Ok(Bytes::new()),
        }
    }

    /// Encode a value.
    ///
    /// Unserializable values are an error: a write must not silently store
    /// something other than what the caller asked for.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        match self {
            Codec::Text => encode_text(value),
            Codec::Binary => bincode::serialize(value)
                .map(Bytes::from)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            Codec::Compressed { level } => {
                let raw = bincode::serialize(value)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                zstd::encode_all(raw.as_slice(), *level)
                    .map(Bytes::from)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }

    /// Decode bytes, keeping failures visible to the caller.
    ///
    /// `Ok(None)` is an absent value (zero bytes for the binary codecs).
    pub fn try_decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Option<T>> {
        match self {
            Codec::Text => decode_text(bytes),
            Codec::Binary => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                bincode::deserialize(bytes)
                    .map(Some)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            }
            Codec::Compressed { .. } => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let raw = zstd::decode_all(bytes)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                bincode::deserialize(&raw)
                    .map(Some)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }

    /// Decode bytes, downgrading corruption to an absent value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Option<T> {
        match self.try_decode(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(codec = ?self, len = bytes.len(), error = %e, "Failed to decode cached bytes");
                None
            }
        }
    }
}

fn encode_text<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let text = match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(serde_json::Value::Null) => String::new(),
        Ok(serde_json::Value::Number(n)) => n.to_string(),
        Ok(serde_json::Value::Bool(b)) => b.to_string(),
        Ok(other) => {
            return Err(CacheError::Serialization(format!(
                "text codec only accepts scalar values, got {other}"
            )))
        }
        Err(e) => return Err(CacheError::Serialization(e.to_string())),
    };
    Ok(Bytes::from(text.into_bytes()))
}

fn decode_text<T: DeserializeOwned>(bytes: &[u8]) -> Result<Option<T>> {
    let text = std::str::from_utf8(bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;

    // Strings first, then numbers and booleans written by `encode_text`.
    if let Ok(value) = serde_json::from_value(serde_json::Value::String(text.to_string())) {
        return Ok(Some(value));
    }
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| CacheError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn account() -> Account {
        Account {
            id: 42,
            name: "acct".to_string(),
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn test_empty_encodings() {
        for codec in [Codec::Text, Codec::Binary, Codec::Compressed { level: 3 }] {
            assert!(codec.encode_opt::<String>(None).unwrap().is_empty());
        }
        assert!(Codec::Text.encode("").unwrap().is_empty());
    }

    #[test]
    fn test_empty_bytes_decode() {
        assert_eq!(Codec::Binary.decode::<Account>(&[]), None);
        assert_eq!(Codec::Compressed { level: 3 }.decode::<Account>(&[]), None);
        assert_eq!(Codec::Text.decode::<String>(&[]), Some(String::new()));
        assert_eq!(Codec::Text.decode::<u64>(&[]), None);
    }

    #[test]
    fn test_text_codec_is_plain_utf8() {
        let bytes = Codec::Text.encode("42").unwrap();
        assert_eq!(&bytes[..], b"42");

        let numeric = Codec::Text.encode(&42u64).unwrap();
        assert_eq!(&numeric[..], b"42");
        assert_eq!(Codec::Text.decode::<u64>(&numeric), Some(42));
        assert_eq!(Codec::Text.decode::<String>(&numeric), Some("42".to_string()));
    }

    #[test]
    fn test_text_codec_rejects_structs() {
        assert!(Codec::Text.encode(&account()).is_err());
    }

    #[test]
    fn test_binary_and_compressed_structs() {
        for codec in [Codec::Binary, Codec::Compressed { level: 3 }] {
            let bytes = codec.encode(&account()).unwrap();
            assert_eq!(codec.decode::<Account>(&bytes), Some(account()));
        }
    }

    #[test]
    fn test_corrupt_bytes_decode_to_absent() {
        assert_eq!(Codec::Binary.decode::<Account>(&[0xff, 0x01]), None);
        assert_eq!(Codec::Compressed { level: 3 }.decode::<Account>(b"garbage"), None);
        assert!(Codec::Binary.try_decode::<Account>(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_compression_shrinks_repetitive_values() {
        let value = vec![7u8; 8192];
        let plain = Codec::Binary.encode(&value).unwrap();
        let packed = Codec::Compressed { level: 3 }.encode(&value).unwrap();
        assert!(packed.len() < plain.len());
    }
}
