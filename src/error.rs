//! # Error Types
//!
//! Error handling for the transport and dispatch layer.
//!
//! This module defines all error variants that can occur while framing,
//! reading, writing, marshaling and routing messages.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures, peer resets, accept failures
//! - **Framing Errors**: frames outside the configured length window
//! - **Protocol Errors**: unregistered message IDs or types, undersized messages
//! - **Backpressure Errors**: full outbound queues
//! - **Configuration Errors**: invalid options, duplicate registrations
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use leafnet::error::{ProtocolError, Result};
//! use std::fs::File;
//! use std::io::Read;
//! use tracing::{info, error};
//!
//! fn read_file(path: &str) -> Result<String> {
//!     let mut file = File::open(path).map_err(ProtocolError::Io)?;
//!     let mut contents = String::new();
//!     file.read_to_string(&mut contents).map_err(ProtocolError::Io)?;
//!     Ok(contents)
//! }
//!
//! fn main() {
//!     match read_file("example.txt") {
//!         Ok(contents) => info!(contents, "Successfully read file"),
//!         Err(e) => error!(error=%e, "Error reading file"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    #[error("message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("write chan full")]
    ChannelFull,

    #[error("client closed")]
    ClientClosed,

    #[error("already started")]
    AlreadyStarted,

    #[error("fail to init: {0}")]
    InitError(String),

    #[error("message data too short: {0} bytes")]
    DataTooShort(usize),

    #[error("message {0} not registered")]
    UnregisteredType(String),

    #[error("message id {0} not registered")]
    UnregisteredId(u16),

    #[error("message {0} is already registered")]
    DuplicateType(String),

    #[error("message id {0} is already registered")]
    DuplicateId(u16),

    #[error("too many messages registered (max = {0})")]
    IdSpaceExhausted(usize),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("RPC error: {0}")]
    RpcError(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ProtocolError::ConnectionClosed,
            WsError::Io(e) => ProtocolError::Io(e),
            other => ProtocolError::WebSocketError(other.to_string()),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
