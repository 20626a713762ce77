//! # UDP Transport
//!
//! Datagram transport with no framing: one packet carries one processor
//! envelope. Every queued endpoint runs three tasks joined by bounded queues:
//!
//! ```text
//! socket --listen--> read queue --dispatch--> Processor::route
//! write_msg --> write queue --write (retry up to max_try)--> socket
//! ```
//!
//! Packets arriving while the read queue is full are dropped and logged.

mod async_client;
mod broadcast;
mod client;
mod server;

pub use async_client::{AsyncClientOptions, UdpAsyncClient};
pub use broadcast::BroadcastClient;
pub use client::UdpClient;
pub use server::{UdpContext, UdpServer, UdpServerHandle};

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tracing::{error, warn};

use crate::utils::metrics::global_metrics;

/// Largest payload a single UDP datagram can carry
pub const MAX_PACKET_SIZE: usize = 65507;

/// Default receive buffer per datagram
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Default capacity of the read and write queues
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Default number of send attempts per packet
pub const DEFAULT_MAX_TRY: usize = 3;

/// Receive buffer size: zero means default, anything above the datagram
/// ceiling is clamped.
pub(crate) fn packet_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_PACKET_SIZE,
        n => n.min(MAX_PACKET_SIZE),
    }
}

/// Wildcard local address in the same family as `peer`
pub(crate) fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

/// Try `send` up to `max_try` times. Returns whether an attempt succeeded.
pub(crate) async fn send_with_retry<F, Fut>(max_try: usize, mut send: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<usize>>,
{
    let max_try = max_try.max(1);
    for attempt in 1..=max_try {
        match send().await {
            Ok(_) => return true,
            Err(e) => error!(attempt, max_try, error = %e, "fail to write udp packet"),
        }
    }
    warn!(max_try, "dropping udp packet");
    global_metrics().send_failure();
    false
}
