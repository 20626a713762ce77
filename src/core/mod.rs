//! # Core Wire Components
//!
//! Low-level framing, byte order handling and payload serialization.
//!
//! This module provides the foundation every transport builds on: the
//! length-prefixed frame codec used by stream transports and the serialization
//! formats the message processor applies to payloads.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed framing over byte streams
//! - **Serialization**: bincode / JSON / MessagePack payload encoding
//!
//! ## Wire Format
//! ```text
//! [Length(1|2|4)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Length validated against a `[min, max]` window before allocation
//! - Zero-length frames rejected unless explicitly allowed

pub mod codec;
pub mod serialization;

use serde::{Deserialize, Serialize};

/// Byte order for length prefixes and message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network byte order (default)
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub fn from_little_endian(little_endian: bool) -> Self {
        if little_endian {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    #[inline]
    pub fn read_u16(self, buf: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(buf),
            ByteOrder::Little => u16::from_le_bytes(buf),
        }
    }

    #[inline]
    pub fn write_u16(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    #[inline]
    pub fn read_u32(self, buf: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(buf),
            ByteOrder::Little => u32::from_le_bytes(buf),
        }
    }

    #[inline]
    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }
}

/// Concatenate message parts into one contiguous buffer.
///
/// A single part is returned as-is without copying.
pub fn merge_bytes(parts: &[bytes::Bytes]) -> bytes::Bytes {
    if parts.len() == 1 {
        return parts[0].clone();
    }
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut buf = bytes::BytesMut::with_capacity(total);
    for part in parts {
        buf.extend_from_slice(part);
    }
    buf.freeze()
}
