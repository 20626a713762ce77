use std::any::Any;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::core::merge_bytes;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Decoded, Processor};
use crate::transport::udp::{packet_size, unspecified_for};
use crate::utils::timeout::with_optional_timeout;

/// Request/response UDP client: send one packet, wait for one reply.
pub struct UdpClient {
    socket: UdpSocket,
    packet_size: usize,
}

impl UdpClient {
    /// Resolve `addr` and connect a fresh socket to it.
    pub async fn connect(addr: &str) -> Result<Self> {
        let peer = lookup_host(addr)
            .await
            .map_err(|e| ProtocolError::InitError(format!("cannot resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| ProtocolError::InitError(format!("cannot resolve {addr}")))?;

        let socket = UdpSocket::bind(unspecified_for(&peer))
            .await
            .map_err(|e| ProtocolError::InitError(e.to_string()))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| ProtocolError::InitError(e.to_string()))?;

        Ok(Self {
            socket,
            packet_size: packet_size(0),
        })
    }

    /// Largest reply accepted, capped at the datagram ceiling.
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = packet_size(size);
        self
    }

    /// Send `data` and wait for one reply. `deadline` bounds only the read;
    /// `None` waits forever.
    pub async fn request(&self, data: &[u8], deadline: Option<Duration>) -> Result<Bytes> {
        self.socket.send(data).await?;

        let mut buf = vec![0u8; self.packet_size];
        let read = async { self.socket.recv(&mut buf).await.map_err(ProtocolError::from) };
        let n = with_optional_timeout(read, deadline).await?;
        debug!(sent = data.len(), received = n, "udp request completed");

        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// [`request`](Self::request) with processor encoding on both legs.
    pub async fn request_msg(
        &self,
        processor: &dyn Processor,
        msg: &dyn Any,
        deadline: Option<Duration>,
    ) -> Result<Decoded> {
        let parts = processor.marshal(msg)?;
        let reply = self.request(&merge_bytes(&parts), deadline).await?;
        processor.unmarshal(reply)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.peer_addr()?)
    }
}
