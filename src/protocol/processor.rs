//! # Message Processor
//!
//! Registry mapping 16-bit message IDs to payload types, plus the routing
//! table that says where each decoded message goes.
//!
//! Registration happens during start-up through `&mut self`; afterwards the
//! processor is shared read-only (typically behind an `Arc`).

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::core::serialization::SerializationFormat;
use crate::core::ByteOrder;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Payload, RpcSink};

/// Most message types a single processor can hold
pub const MAX_MSG_COUNT: usize = u16::MAX as usize;

/// Length of the ID prefix in every envelope
pub const MSG_ID_LEN: usize = 2;

/// Typed message handler: `(message, context)`
pub type MsgHandler = Arc<dyn Fn(Payload, Payload) + Send + Sync>;

/// Raw message handler: `(id, payload bytes, context)`
pub type RawHandler = Arc<dyn Fn(u16, Bytes, Payload) + Send + Sync>;

/// Result of [`Processor::unmarshal`]
#[derive(Clone)]
pub enum Decoded {
    /// Deserialized message of the type registered for `id`
    Message { id: u16, msg: Payload },
    /// Undecoded payload for an ID with a raw handler
    Raw { id: u16, data: Bytes },
}

impl Decoded {
    pub fn id(&self) -> u16 {
        match self {
            Decoded::Message { id, .. } | Decoded::Raw { id, .. } => *id,
        }
    }

    /// Borrow the decoded message as `T`, if that is what it is.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Decoded::Message { msg, .. } => msg.downcast_ref::<T>(),
            Decoded::Raw { .. } => None,
        }
    }
}

impl std::fmt::Debug for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decoded::Message { id, .. } => f.debug_struct("Message").field("id", id).finish_non_exhaustive(),
            Decoded::Raw { id, data } => f
                .debug_struct("Raw")
                .field("id", id)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Envelope codec and message router used by gates and UDP endpoints
pub trait Processor: Send + Sync + 'static {
    /// Encode `msg` as `[id bytes, payload bytes]`.
    fn marshal(&self, msg: &dyn Any) -> Result<Vec<Bytes>>;

    /// Decode one envelope.
    fn unmarshal(&self, data: Bytes) -> Result<Decoded>;

    /// Deliver a decoded message along with its connection context.
    fn route(&self, msg: Decoded, ctx: Payload) -> Result<()>;
}

type EncodeFn = fn(&dyn Any, SerializationFormat) -> Result<Vec<u8>>;
type DecodeFn = fn(&[u8], SerializationFormat) -> Result<Payload>;

struct MsgInfo {
    type_name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
    handler: Option<MsgHandler>,
    router: Option<Arc<dyn RpcSink>>,
    raw_handler: Option<RawHandler>,
}

fn encode_as<T: Serialize + 'static>(msg: &dyn Any, format: SerializationFormat) -> Result<Vec<u8>> {
    let value = msg
        .downcast_ref::<T>()
        .ok_or_else(|| ProtocolError::SerializeError(format!("expected {}", type_name::<T>())))?;
    format.serialize(value)
}

fn decode_as<T>(data: &[u8], format: SerializationFormat) -> Result<Payload>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Ok(Arc::new(format.deserialize::<T>(data)?))
}

/// ID-keyed processor
///
/// ```rust
/// use leafnet::protocol::{Decoded, MsgProcessor, Processor};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Hello { name: String }
///
/// let mut processor = MsgProcessor::new();
/// processor.register::<Hello>(1).unwrap();
///
/// let parts = processor.marshal(&Hello { name: "leaf".into() }).unwrap();
/// let data = leafnet::core::merge_bytes(&parts);
/// let decoded = processor.unmarshal(data).unwrap();
/// assert_eq!(decoded.id(), 1);
/// assert_eq!(decoded.downcast_ref::<Hello>().unwrap().name, "leaf");
/// ```
pub struct MsgProcessor {
    byte_order: ByteOrder,
    format: SerializationFormat,
    msg_info: HashMap<u16, MsgInfo>,
    msg_id: HashMap<TypeId, u16>,
}

impl Default for MsgProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgProcessor {
    pub fn new() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            format: SerializationFormat::default(),
            msg_info: HashMap::new(),
            msg_id: HashMap::new(),
        }
    }

    /// Byte order of the ID prefix
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Payload encoding
    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Bind message type `T` to `id`.
    pub fn register<T>(&mut self, id: u16) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let type_name = type_name::<T>();
        if self.msg_id.contains_key(&TypeId::of::<T>()) {
            return Err(ProtocolError::DuplicateType(type_name.to_string()));
        }
        if self.msg_info.len() >= MAX_MSG_COUNT {
            return Err(ProtocolError::IdSpaceExhausted(MAX_MSG_COUNT));
        }
        if self.msg_info.contains_key(&id) {
            return Err(ProtocolError::DuplicateId(id));
        }

        self.msg_info.insert(
            id,
            MsgInfo {
                type_name,
                encode: encode_as::<T>,
                decode: decode_as::<T>,
                handler: None,
                router: None,
                raw_handler: None,
            },
        );
        self.msg_id.insert(TypeId::of::<T>(), id);
        Ok(())
    }

    /// ID registered for `T`
    pub fn message_id<T: 'static>(&self) -> Option<u16> {
        self.msg_id.get(&TypeId::of::<T>()).copied()
    }

    fn info_for<T: 'static>(&mut self) -> Result<&mut MsgInfo> {
        let id = self
            .message_id::<T>()
            .ok_or_else(|| ProtocolError::UnregisteredType(type_name::<T>().to_string()))?;
        self.msg_info
            .get_mut(&id)
            .ok_or(ProtocolError::UnregisteredId(id))
    }

    /// Handle `T` locally, on the task that routes it.
    pub fn set_handler<T, F>(&mut self, handler: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, Payload) + Send + Sync + 'static,
    {
        let info = self.info_for::<T>()?;
        info.handler = Some(Arc::new(move |msg: Payload, ctx: Payload| {
            if let Ok(msg) = msg.downcast::<T>() {
                handler(msg, ctx);
            }
        }));
        Ok(())
    }

    /// Forward `T` to `sink` as event `type_name::<T>()` with args `[msg, ctx]`.
    pub fn set_router<T: 'static>(&mut self, sink: Arc<dyn RpcSink>) -> Result<()> {
        self.info_for::<T>()?.router = Some(sink);
        Ok(())
    }

    /// Skip deserialization for `id` and hand its raw payload to `handler`.
    pub fn set_raw_handler<F>(&mut self, id: u16, handler: F) -> Result<()>
    where
        F: Fn(u16, Bytes, Payload) + Send + Sync + 'static,
    {
        let info = self
            .msg_info
            .get_mut(&id)
            .ok_or(ProtocolError::UnregisteredId(id))?;
        info.raw_handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Visit every registration in ascending ID order.
    pub fn for_each<F: FnMut(u16, &str)>(&self, mut f: F) {
        let mut ids: Vec<u16> = self.msg_info.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(info) = self.msg_info.get(&id) {
                f(id, info.type_name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.msg_info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg_info.is_empty()
    }

    fn info(&self, id: u16) -> Result<&MsgInfo> {
        self.msg_info.get(&id).ok_or(ProtocolError::UnregisteredId(id))
    }
}

impl Processor for MsgProcessor {
    fn marshal(&self, msg: &dyn Any) -> Result<Vec<Bytes>> {
        let type_id = msg.type_id();
        let id = *self
            .msg_id
            .get(&type_id)
            .ok_or_else(|| ProtocolError::UnregisteredType(format!("{type_id:?}")))?;
        let info = self.info(id)?;

        let payload = (info.encode)(msg, self.format)?;
        Ok(vec![
            Bytes::copy_from_slice(&self.byte_order.write_u16(id)),
            Bytes::from(payload),
        ])
    }

    fn unmarshal(&self, data: Bytes) -> Result<Decoded> {
        if data.len() < MSG_ID_LEN {
            return Err(ProtocolError::DataTooShort(data.len()));
        }

        let id = self.byte_order.read_u16([data[0], data[1]]);
        let info = self.info(id)?;
        if info.raw_handler.is_some() {
            return Ok(Decoded::Raw {
                id,
                data: data.slice(MSG_ID_LEN..),
            });
        }

        let msg = (info.decode)(&data[MSG_ID_LEN..], self.format)?;
        Ok(Decoded::Message { id, msg })
    }

    fn route(&self, msg: Decoded, ctx: Payload) -> Result<()> {
        match msg {
            Decoded::Raw { id, data } => {
                match &self.info(id)?.raw_handler {
                    Some(handler) => handler(id, data, ctx),
                    None => debug!(id, "no raw handler registered, message dropped"),
                }
                Ok(())
            }
            Decoded::Message { id, msg } => {
                let info = self.info(id)?;
                if info.handler.is_none() && info.router.is_none() {
                    debug!(id, type_name = info.type_name, "no handler or router, message dropped");
                    return Ok(());
                }

                if let Some(handler) = &info.handler {
                    handler(msg.clone(), ctx.clone());
                }
                if let Some(router) = &info.router {
                    router.go(info.type_name, vec![msg, ctx]);
                }
                Ok(())
            }
        }
    }
}
