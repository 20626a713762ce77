use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::transport::udp::{unspecified_for, DEFAULT_PACKET_SIZE};

/// Sends one datagram to a broadcast (or any) address and collects replies.
///
/// The responding side is an ordinary [`UdpServer`](super::UdpServer).
#[derive(Debug, Clone)]
pub struct BroadcastClient {
    target: SocketAddr,
}

impl BroadcastClient {
    pub fn new(target: IpAddr, port: u16) -> Self {
        Self {
            target: SocketAddr::new(target, port),
        }
    }

    async fn bind(&self) -> Result<UdpSocket> {
        let socket = UdpSocket::bind(unspecified_for(&self.target)).await?;
        if self.target.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        Ok(socket)
    }

    /// Send `msg` without waiting for replies.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        let socket = self.bind().await?;
        socket.send_to(msg, self.target).await?;
        Ok(())
    }

    /// Send `msg`, then pass every reply received within `timeout` to
    /// `callback`. Returns the number of replies.
    pub async fn broad<F>(&self, msg: &[u8], timeout: Duration, mut callback: F) -> Result<usize>
    where
        F: FnMut(&[u8], SocketAddr),
    {
        let socket = self.bind().await?;
        socket.send_to(msg, self.target).await?;

        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; DEFAULT_PACKET_SIZE];
        let mut replies = 0;
        loop {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, addr))) => {
                    callback(&buf[..n], addr);
                    replies += 1;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "broadcast read stopped");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(replies)
    }
}
