//! Symmetric encoding and decoding of values to and from byte strings.
//!
//! The codec is the only seam through which aggregate state and event
//! payloads leave and enter memory; backends treat the resulting bytes as
//! opaque. [`JsonCodec`] is the default. Alternative formats (binary
//! framing, schema-evolving encodings) can be swapped in without touching
//! the store.

use serde::{Serialize, de::DeserializeOwned};

/// Paired serialization operations over opaque byte strings.
///
/// For any value `v` of a supported type, `deserialize(serialize(v))`
/// reproduces `v` structurally.
pub trait Codec {
    /// Error raised when a value cannot be encoded or decoded.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the value cannot be represented.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize;

    /// Deserialize a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the bytes do not match the
    /// target shape.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
///
/// Values are serialized by field name, so field names are part of the
/// stored contract: renaming one is a breaking change unless the type
/// carries serde aliases for the legacy name.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}
