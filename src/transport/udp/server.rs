use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument};

use crate::core::merge_bytes;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Payload, Processor};
use crate::transport::udp::{packet_size, send_with_retry, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_TRY};
use crate::utils::metrics::global_metrics;

enum Outgoing {
    Packet { addr: SocketAddr, data: Bytes },
    Close,
}

/// Cloneable handle for replying through a running [`UdpServer`]
#[derive(Clone)]
pub struct UdpServerHandle {
    tx: mpsc::Sender<Outgoing>,
    processor: Arc<dyn Processor>,
    local_addr: SocketAddr,
}

impl UdpServerHandle {
    /// Marshal `msg` and queue it for `addr`.
    ///
    /// Fails with `ChannelFull` when the write queue is saturated.
    pub fn write_msg(&self, msg: &dyn Any, addr: SocketAddr) -> Result<()> {
        if self.tx.capacity() == 0 {
            return Err(ProtocolError::ChannelFull);
        }
        let parts = self.processor.marshal(msg)?;
        self.write_raw(merge_bytes(&parts), addr)
    }

    /// Queue an already encoded packet for `addr`.
    pub fn write_raw(&self, data: Bytes, addr: SocketAddr) -> Result<()> {
        match self.tx.try_send(Outgoing::Packet { addr, data }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ProtocolError::ChannelFull),
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Route context for packets received by a [`UdpServer`]
#[derive(Clone)]
pub struct UdpContext {
    /// Sender of the packet
    pub addr: SocketAddr,
    pub server: UdpServerHandle,
}

impl UdpContext {
    /// Reply to the sender
    pub fn reply(&self, msg: &dyn Any) -> Result<()> {
        self.server.write_msg(msg, self.addr)
    }
}

struct Running {
    handle: UdpServerHandle,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Queued UDP server
pub struct UdpServer {
    addr: String,
    buffer_size: usize,
    max_try: usize,
    packet_size: usize,
    processor: Arc<dyn Processor>,
    running: Option<Running>,
}

impl UdpServer {
    pub fn new(addr: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        Self {
            addr: addr.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_try: DEFAULT_MAX_TRY,
            packet_size: packet_size(0),
            processor,
            running: None,
        }
    }

    /// Capacity of the read and write queues. Zero falls back to the default.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = if buffer_size == 0 { DEFAULT_BUFFER_SIZE } else { buffer_size };
        self
    }

    /// Send attempts per packet. Zero falls back to the default.
    pub fn with_max_try(mut self, max_try: usize) -> Self {
        self.max_try = if max_try == 0 { DEFAULT_MAX_TRY } else { max_try };
        self
    }

    /// Receive buffer per datagram, capped at the datagram ceiling.
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = packet_size(size);
        self
    }

    /// Bind the socket and spawn the listen, write and dispatch tasks.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn start(&mut self) -> Result<UdpServerHandle> {
        if self.running.is_some() {
            return Err(ProtocolError::AlreadyStarted);
        }

        let socket = Arc::new(UdpSocket::bind(&self.addr).await?);
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "udp server listening");

        let (write_tx, write_rx) = mpsc::channel(self.buffer_size);
        let (read_tx, read_rx) = mpsc::channel(self.buffer_size);
        let handle = UdpServerHandle {
            tx: write_tx.clone(),
            processor: self.processor.clone(),
            local_addr,
        };
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(listen_loop(
            socket.clone(),
            read_tx,
            write_tx,
            shutdown.clone(),
            self.packet_size,
        ));
        tracker.spawn(write_loop(socket, write_rx, self.max_try));
        tracker.spawn(dispatch_loop(read_rx, handle.clone()));
        tracker.close();

        self.running = Some(Running {
            handle: handle.clone(),
            shutdown,
            tracker,
        });
        Ok(handle)
    }

    /// Handle of the running server
    pub fn handle(&self) -> Option<UdpServerHandle> {
        self.running.as_ref().map(|r| r.handle.clone())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.handle.local_addr)
    }

    /// See [`UdpServerHandle::write_msg`].
    pub fn write_msg(&self, msg: &dyn Any, addr: SocketAddr) -> Result<()> {
        match &self.running {
            Some(running) => running.handle.write_msg(msg, addr),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Stop listening, flush queued replies and wait for all three tasks.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.cancel();
            running.tracker.wait().await;
        }
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    read_tx: mpsc::Sender<(SocketAddr, Bytes)>,
    write_tx: mpsc::Sender<Outgoing>,
    shutdown: CancellationToken,
    packet_size: usize,
) {
    let mut buf = vec![0u8; packet_size];
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = socket.recv_from(&mut buf) => res,
        };
        match received {
            Ok((n, addr)) => {
                let packet = Bytes::copy_from_slice(&buf[..n]);
                if read_tx.try_send((addr, packet)).is_err() {
                    error!(%addr, "read chan full, drop packet");
                    global_metrics().packet_dropped();
                }
            }
            Err(e) => error!(error = %e, "fail to read udp packet"),
        }
    }

    drop(read_tx);
    let _ = write_tx.send(Outgoing::Close).await;
}

async fn write_loop(socket: Arc<UdpSocket>, mut rx: mpsc::Receiver<Outgoing>, max_try: usize) {
    while let Some(Outgoing::Packet { addr, data }) = rx.recv().await {
        send_with_retry(max_try, || socket.send_to(&data, addr)).await;
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<(SocketAddr, Bytes)>, handle: UdpServerHandle) {
    let processor = handle.processor.clone();
    while let Some((addr, data)) = rx.recv().await {
        let decoded = match processor.unmarshal(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(%addr, error = %e, "fail to decode udp packet");
                global_metrics().protocol_error();
                continue;
            }
        };

        let ctx: Payload = Arc::new(UdpContext {
            addr,
            server: handle.clone(),
        });
        if let Err(e) = processor.route(decoded, ctx) {
            error!(%addr, error = %e, "fail to route udp packet");
        }
    }
    debug!("udp dispatch stopped");
}
