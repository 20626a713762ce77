//! # Message Protocol
//!
//! Turns transport payloads into typed messages and hands them on.
//!
//! ## Envelope
//! ```text
//! [MessageID(2)] [Serialized payload(N)]
//! ```
//! The ID uses the processor's byte order; the payload uses its
//! [`SerializationFormat`](crate::core::serialization::SerializationFormat).
//!
//! ## Components
//! - **Processor**: ID registry with marshal / unmarshal / route
//! - **RpcSink**: fire-and-forget and synchronous event delivery into another module
//! - **Dispatcher**: in-process `RpcSink` keyed by event name

pub mod dispatcher;
pub mod processor;


use std::any::Any;
use std::sync::Arc;

use crate::error::Result;

pub use dispatcher::Dispatcher;
pub use processor::{Decoded, MsgHandler, MsgProcessor, Processor, RawHandler};

/// A decoded message, route context or RPC argument
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Event delivery into another module's inbound queue
pub trait RpcSink: Send + Sync {
    /// Fire-and-forget
    fn go(&self, event: &str, args: Vec<Payload>);

    /// Deliver and wait for the handler to finish
    fn call0(&self, event: &str, args: Vec<Payload>) -> Result<()>;
}
