//! # Transport Layer
//!
//! Connection-oriented transports (TCP and WebSocket) built around one
//! connection actor per socket, plus a datagram transport over UDP.
//!
//! ## Components
//! - **Conn / Agent**: the connection handle and the per-connection logic
//!   driven by a server or client
//! - **TCP**: length-prefixed frames over a byte stream
//! - **WebSocket**: one binary (or text) message per frame, optional TLS
//! - **UDP**: queued server and clients with per-datagram routing
//!
//! Every stream connection follows the same lifecycle: accept or dial,
//! admission, `Agent::run`, `Conn::close`, deregistration, `Agent::on_close`.

pub(crate) mod conn;
pub(crate) mod dial;
pub(crate) mod listen;
pub(crate) mod registry;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use registry::{ConnRegistry, CoreHandle};

/// A live, message-oriented connection
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Read the next complete message.
    ///
    /// Only the owning agent's run loop should call this. Fails once the
    /// peer disconnects, a frame is malformed or the connection is closed.
    async fn read_msg(&self) -> Result<Bytes>;

    /// Queue one message built from `parts`. Never blocks.
    ///
    /// A message outside the length window fails without touching the
    /// connection. A full write queue destroys the connection instead of
    /// failing the call.
    fn write_msg(&self, parts: &[Bytes]) -> Result<()>;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Flush queued messages, then shut the socket down. Idempotent.
    fn close(&self);

    /// Drop queued messages and reset the socket. Idempotent.
    fn destroy(&self);
}

/// Per-connection application logic
///
/// Transports only need `run` and `on_close`. Writing, closing and user data
/// go through the [`Conn`] the factory received; gates wrap both in
/// [`GateAgent`](crate::gate::GateAgent), which carries the full surface.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Serve the connection until it fails or should end.
    async fn run(&self);

    /// Called exactly once after the connection is closed and deregistered.
    async fn on_close(&self);
}

/// Factory invoked once per admitted connection
pub type NewAgent<C> = Arc<dyn Fn(Arc<C>) -> Arc<dyn Agent> + Send + Sync>;

/// Drive one admitted connection through its lifecycle.
pub(crate) async fn serve<C>(registry: &ConnRegistry, id: u64, conn: Arc<C>, new_agent: &NewAgent<C>)
where
    C: Conn + CoreHandle,
{
    let agent = new_agent(conn.clone());
    agent.run().await;

    conn.close();
    registry.remove(id);
    agent.on_close().await;
}
