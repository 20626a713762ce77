//! # leafnet
//!
//! Transport and message-dispatch layer for game servers.
//!
//! ```text
//! Frame Codec -> Connection (bounded write queue + pump task)
//!   -> TCP / WebSocket servers and clients
//!   -> UDP server, async client, sync client, broadcast
//!   -> Message Processor (16-bit IDs) -> Gate
//! ```
//!
//! ## Layers
//! - [`core`]: length-prefixed framing, byte order, payload formats
//! - [`transport`]: connection actors, servers, clients and UDP endpoints
//! - [`protocol`]: message ID registry, marshal / unmarshal / route
//! - [`gate`]: processor-driven agents behind TCP and WebSocket
//! - [`config`], [`utils`]: configuration, logging, metrics, timeouts
//!
//! ## Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use tokio_util::sync::CancellationToken;
//! use leafnet::gate::{Gate, GateAgent};
//! use leafnet::module::Module;
//! use leafnet::protocol::MsgProcessor;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Hello {
//!     name: String,
//! }
//!
//! # async fn demo() -> leafnet::error::Result<()> {
//! let mut processor = MsgProcessor::new();
//! processor.register::<Hello>(0)?;
//! processor.set_handler::<Hello, _>(|hello, ctx| {
//!     if let Some(agent) = ctx.downcast_ref::<GateAgent>() {
//!         agent.write_msg(&Hello { name: format!("hi {}", hello.name) });
//!     }
//! })?;
//!
//! let gate = Gate::new()
//!     .with_tcp_addr("0.0.0.0:3563")
//!     .with_processor(Arc::new(processor));
//! let close_sig = CancellationToken::new();
//! gate.run(close_sig).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod gate;
pub mod module;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use gate::{ClientGate, Gate, GateAgent};
pub use module::Module;
pub use protocol::{MsgProcessor, Payload, Processor, RpcSink};
