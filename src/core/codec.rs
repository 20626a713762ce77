//! # Frame Codec
//!
//! Length-prefixed framing for stream transports.
//!
//! ```text
//! [Length(1|2|4)] [Payload(N)]
//! ```
//!
//! The prefix width, its byte order and the accepted `[min, max]` payload
//! window are configurable. Decoding never yields a partial payload, and a
//! length outside the window is an error that ends the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::core::ByteOrder;
use crate::error::{ProtocolError, Result};

/// Default prefix width in bytes
pub const DEFAULT_LEN_MSG_LEN: usize = 2;

/// Default minimum payload length
pub const DEFAULT_MIN_MSG_LEN: u32 = 1;

/// Default maximum payload length for stream transports
pub const DEFAULT_MAX_MSG_LEN: u32 = 4096;

/// Read/write capability every stream parser provides.
///
/// The read side is a [`Decoder`] producing one payload per frame; the write
/// side turns a list of message parts into one wire-ready buffer.
pub trait Parser:
    Decoder<Item = Bytes, Error = ProtocolError> + Clone + Send + Sync + 'static
{
    /// Build one frame out of `parts`, in order.
    fn frame(&self, parts: &[Bytes]) -> Result<Bytes>;
}

/// Length-prefixed frame codec
#[derive(Debug, Clone)]
pub struct FrameCodec {
    len_msg_len: usize,
    min_msg_len: u32,
    max_msg_len: u32,
    byte_order: ByteOrder,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            len_msg_len: DEFAULT_LEN_MSG_LEN,
            min_msg_len: DEFAULT_MIN_MSG_LEN,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            byte_order: ByteOrder::Big,
        }
    }
}

impl FrameCodec {
    /// Create a codec with explicit prefix width and length window.
    ///
    /// `max_msg_len` is clamped to what the prefix can express.
    pub fn new(len_msg_len: usize, min_msg_len: u32, max_msg_len: u32) -> Result<Self> {
        Self::default().with_msg_len(len_msg_len, min_msg_len, max_msg_len)
    }

    pub fn with_msg_len(mut self, len_msg_len: usize, min_msg_len: u32, max_msg_len: u32) -> Result<Self> {
        let ceiling = match len_msg_len {
            1 => u8::MAX as u32,
            2 => u16::MAX as u32,
            4 => u32::MAX,
            other => {
                return Err(ProtocolError::ConfigError(format!(
                    "invalid length prefix width: {other} (expected 1, 2 or 4)"
                )))
            }
        };
        let max_msg_len = max_msg_len.min(ceiling);
        if min_msg_len > max_msg_len {
            return Err(ProtocolError::ConfigError(format!(
                "min message length {min_msg_len} exceeds max {max_msg_len}"
            )));
        }

        self.len_msg_len = len_msg_len;
        self.min_msg_len = min_msg_len;
        self.max_msg_len = max_msg_len;
        Ok(self)
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn len_msg_len(&self) -> usize {
        self.len_msg_len
    }

    pub fn min_msg_len(&self) -> u32 {
        self.min_msg_len
    }

    pub fn max_msg_len(&self) -> u32 {
        self.max_msg_len
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    #[inline]
    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_msg_len as usize {
            Err(ProtocolError::MessageTooLong(len))
        } else if len < self.min_msg_len as usize {
            Err(ProtocolError::MessageTooShort(len))
        } else {
            Ok(())
        }
    }

    fn read_prefix(&self, src: &[u8]) -> usize {
        match self.len_msg_len {
            1 => src[0] as usize,
            2 => self.byte_order.read_u16([src[0], src[1]]) as usize,
            _ => self.byte_order.read_u32([src[0], src[1], src[2], src[3]]) as usize,
        }
    }

    fn put_prefix(&self, len: usize, dst: &mut BytesMut) {
        // bounds were checked against a max clamped to the prefix width
        match self.len_msg_len {
            1 => dst.put_u8(len as u8),
            2 => dst.put_slice(&self.byte_order.write_u16(len as u16)),
            _ => dst.put_slice(&self.byte_order.write_u32(len as u32)),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < self.len_msg_len {
            return Ok(None);
        }

        let len = self.read_prefix(src);
        if let Err(e) = self.check_len(len) {
            debug!(len, error = %e, "Rejecting frame outside length window");
            return Err(e);
        }

        let total = self.len_msg_len + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(self.len_msg_len);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.check_len(item.len())?;
        dst.reserve(self.len_msg_len + item.len());
        self.put_prefix(item.len(), dst);
        dst.put_slice(&item);
        Ok(())
    }
}

impl Parser for FrameCodec {
    fn frame(&self, parts: &[Bytes]) -> Result<Bytes> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        self.check_len(len)?;

        let mut buf = BytesMut::with_capacity(self.len_msg_len + len);
        self.put_prefix(len, &mut buf);
        for part in parts {
            buf.put_slice(part);
        }
        Ok(buf.freeze())
    }
}
