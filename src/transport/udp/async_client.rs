use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument};

use crate::core::merge_bytes;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Payload, Processor};
use crate::transport::udp::{
    packet_size, send_with_retry, unspecified_for, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_TRY,
};
use crate::utils::metrics::global_metrics;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

enum Outgoing {
    Packet(Bytes),
    Close,
}

/// Queue and retry settings for [`UdpAsyncClient`]
#[derive(Debug, Clone, Copy)]
pub struct AsyncClientOptions {
    pub buffer_size: usize,
    pub max_try: usize,
    pub packet_size: usize,
}

impl Default for AsyncClientOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_try: DEFAULT_MAX_TRY,
            packet_size: packet_size(0),
        }
    }
}

struct Inner {
    server_addr: String,
    opts: AsyncClientOptions,
    processor: Arc<dyn Processor>,
    status: AtomicU8,
    tx: OnceLock<mpsc::Sender<Outgoing>>,
    local_addr: OnceLock<SocketAddr>,
    shutdown: CancellationToken,
    kill: CancellationToken,
    tracker: TaskTracker,
}

/// UDP client bound to a single server, with the same listen / write /
/// dispatch task layout as [`UdpServer`](super::UdpServer).
///
/// The client itself is the route context handed to processor handlers.
#[derive(Clone)]
pub struct UdpAsyncClient {
    inner: Arc<Inner>,
}

impl UdpAsyncClient {
    pub fn new(server_addr: impl Into<String>, processor: Arc<dyn Processor>, opts: AsyncClientOptions) -> Self {
        let opts = AsyncClientOptions {
            buffer_size: if opts.buffer_size == 0 { DEFAULT_BUFFER_SIZE } else { opts.buffer_size },
            max_try: if opts.max_try == 0 { DEFAULT_MAX_TRY } else { opts.max_try },
            packet_size: packet_size(opts.packet_size),
        };
        Self {
            inner: Arc::new(Inner {
                server_addr: server_addr.into(),
                opts,
                processor,
                status: AtomicU8::new(NOT_STARTED),
                tx: OnceLock::new(),
                local_addr: OnceLock::new(),
                shutdown: CancellationToken::new(),
                kill: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Resolve and connect the socket, then spawn the three tasks.
    ///
    /// A second call fails with `AlreadyStarted`. A failed dial leaves the
    /// client startable again.
    #[instrument(skip(self), fields(server = %self.inner.server_addr))]
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner
            .status
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::AlreadyStarted);
        }

        let socket = match self.dial().await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!(error = %e, "connect udp server failed");
                inner.status.store(NOT_STARTED, Ordering::Release);
                return Err(ProtocolError::InitError(e.to_string()));
            }
        };
        if let Ok(local_addr) = socket.local_addr() {
            let _ = inner.local_addr.set(local_addr);
        }

        let (write_tx, write_rx) = mpsc::channel(inner.opts.buffer_size);
        let (read_tx, read_rx) = mpsc::channel(inner.opts.buffer_size);
        let _ = inner.tx.set(write_tx.clone());

        inner.tracker.spawn(listen_loop(
            socket.clone(),
            read_tx,
            write_tx,
            inner.shutdown.clone(),
            inner.kill.clone(),
            inner.opts.packet_size,
        ));
        inner
            .tracker
            .spawn(write_loop(socket, write_rx, inner.kill.clone(), inner.opts.max_try));
        inner.tracker.spawn(dispatch_loop(read_rx, self.clone()));
        inner.tracker.close();
        Ok(())
    }

    async fn dial(&self) -> Result<UdpSocket> {
        let peer = lookup_host(&self.inner.server_addr)
            .await?
            .next()
            .ok_or_else(|| ProtocolError::InitError(format!("cannot resolve {}", self.inner.server_addr)))?;
        let socket = UdpSocket::bind(unspecified_for(&peer)).await?;
        socket.connect(peer).await?;
        Ok(socket)
    }

    /// Marshal `msg` and queue it for the server.
    pub fn write_msg(&self, msg: &dyn Any) -> Result<()> {
        let parts = self.inner.processor.marshal(msg)?;
        if self.inner.status.load(Ordering::Acquire) != RUNNING {
            return Err(ProtocolError::ClientClosed);
        }
        let Some(tx) = self.inner.tx.get() else {
            return Err(ProtocolError::ClientClosed);
        };
        match tx.try_send(Outgoing::Packet(merge_bytes(&parts))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ProtocolError::ChannelFull),
            Err(TrySendError::Closed(_)) => Err(ProtocolError::ClientClosed),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.status.load(Ordering::Acquire) == CLOSED
    }

    /// Stop reading; queued packets are still sent. Only acts on a running client.
    pub fn close(&self) {
        if self
            .inner
            .status
            .compare_exchange(RUNNING, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.shutdown.cancel();
        }
    }

    /// [`close`](Self::close), then wait for all three tasks to finish.
    ///
    /// Returns at once on a client that was never started or failed to dial.
    pub async fn close_and_wait(&self) {
        self.close();
        // wait() only resolves on a closed tracker
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Stop immediately, discarding queued packets.
    pub fn destroy(&self) {
        self.inner.status.store(CLOSED, Ordering::Release);
        self.inner.kill.cancel();
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    read_tx: mpsc::Sender<Bytes>,
    write_tx: mpsc::Sender<Outgoing>,
    shutdown: CancellationToken,
    kill: CancellationToken,
    packet_size: usize,
) {
    let mut buf = vec![0u8; packet_size];
    loop {
        let received = tokio::select! {
            biased;
            _ = kill.cancelled() => return,
            _ = shutdown.cancelled() => break,
            res = socket.recv(&mut buf) => res,
        };
        match received {
            Ok(n) => {
                if read_tx.try_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    error!("read chan full, drop packet");
                    global_metrics().packet_dropped();
                }
            }
            Err(e) => debug!(error = %e, "fail to read udp packet"),
        }
    }

    drop(read_tx);
    let _ = write_tx.send(Outgoing::Close).await;
}

async fn write_loop(
    socket: Arc<UdpSocket>,
    mut rx: mpsc::Receiver<Outgoing>,
    kill: CancellationToken,
    max_try: usize,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = kill.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(Outgoing::Packet(data)) = item else {
            break;
        };
        send_with_retry(max_try, || socket.send(&data)).await;
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<Bytes>, client: UdpAsyncClient) {
    let processor = client.inner.processor.clone();
    let kill = client.inner.kill.clone();
    loop {
        let data = tokio::select! {
            biased;
            _ = kill.cancelled() => break,
            data = rx.recv() => data,
        };
        let Some(data) = data else {
            break;
        };

        let decoded = match processor.unmarshal(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                error!(error = %e, "unable to unmarshal udp packet, ignored");
                global_metrics().protocol_error();
                continue;
            }
        };
        let ctx: Payload = Arc::new(client.clone());
        if let Err(e) = processor.route(decoded, ctx) {
            error!(error = %e, "fail to route udp packet");
        }
    }
}
