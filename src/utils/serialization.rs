// src/utils/serialization.rs
//! Serialization utilities for persisted records.
//!
//! Provides serialization and deserialization functions for:
//! - JSON data structures
//! - Binary fields stored as base64 strings inside JSON

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// Serializes a value to a JSON byte vector.
pub fn to_json_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(data)?)
}

/// Deserializes a value from JSON bytes.
///
/// # Note
/// The lifetime parameter lets the result borrow from the input buffer.
pub fn from_json_bytes<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}

/// Serde adapter storing `Vec<u8>` as a base64 string.
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter storing `Option<Vec<u8>>` as an optional base64 string.
pub mod base64_opt_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&base64::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|value| base64::decode(value).map_err(serde::de::Error::custom))
            .transpose()
    }
}
