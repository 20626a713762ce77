//! # Serialization Formats
//!
//! Payload encodings available to the message processor. The processor owns
//! the message ID; this module only turns a payload value into bytes and back.
//!
//! ## Formats
//! - **Bincode**: compact binary (default, fastest)
//! - **JSON**: human-readable, useful for browser clients over WebSocket
//! - **MessagePack**: compact binary with a self-describing layout
//!
//! ## Usage
//! ```rust
//! use leafnet::core::serialization::SerializationFormat;
//!
//! let bytes = SerializationFormat::Json.serialize(&vec![1u32, 2, 3]).unwrap();
//! assert_eq!(bytes, b"[1,2,3]");
//! let back: Vec<u32> = SerializationFormat::Json.deserialize(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, browser interop)
    Json,
    /// Compact binary format (MessagePack)
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a payload value
    pub fn serialize<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => {
                bincode::serialize(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::to_vec(value).map_err(|e| ProtocolError::SerializeError(e.to_string()))
            }
        }
    }

    /// Deserialize a payload into a fresh value
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Move {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_format_names() {
        assert_eq!(SerializationFormat::Bincode.name(), "Bincode");
        assert_eq!(SerializationFormat::Json.name(), "JSON");
        assert_eq!(SerializationFormat::MessagePack.name(), "MessagePack");
    }

    #[test]
    fn test_default_format() {
        assert_eq!(SerializationFormat::default(), SerializationFormat::Bincode);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_each_format_restores_value() {
        for format in [
            SerializationFormat::Bincode,
            SerializationFormat::Json,
            SerializationFormat::MessagePack,
        ] {
            let bytes = format.serialize(&Move { x: -3, y: 7 }).expect("serialize");
            let back: Move = format.deserialize(&bytes).expect("deserialize");
            assert_eq!(back, Move { x: -3, y: 7 }, "format {}", format.name());
        }
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn test_format_sizes() {
        let value = Move { x: 1, y: 2 };

        let bincode_size = SerializationFormat::Bincode.serialize(&value).expect("bincode").len();
        let json_size = SerializationFormat::Json.serialize(&value).expect("json").len();
        let msgpack_size = SerializationFormat::MessagePack.serialize(&value).expect("msgpack").len();

        println!("Bincode: {bincode_size} bytes");
        println!("JSON: {json_size} bytes");
        println!("MessagePack: {msgpack_size} bytes");

        assert!(msgpack_size < json_size);
    }

    #[test]
    fn test_garbage_is_deserialize_error() {
        let result: Result<Move> = SerializationFormat::Json.deserialize(b"not json");
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));

        // truncated bincode lands in the same variant
        let result: Result<Move> = SerializationFormat::Bincode.deserialize(&[0x01]);
        assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
    }
}
