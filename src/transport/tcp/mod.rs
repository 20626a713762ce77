//! # TCP Transport
//!
//! Length-prefixed messages over TCP. [`TcpServer`] accepts and admits
//! sockets, [`TcpClient`] dials and reconnects; both wrap every socket into a
//! [`TcpConn`] and hand it to a caller-supplied [`Agent`](crate::transport::Agent).

mod client;
mod server;

pub use client::TcpClient;
pub use server::{TcpServer, DEFAULT_MAX_CONN_NUM, DEFAULT_PENDING_WRITE_NUM};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;

use crate::core::codec::{FrameCodec, Parser};
use crate::error::{ProtocolError, Result};
use crate::transport::conn::{ConnCore, FrameSink};
use crate::transport::registry::CoreHandle;
use crate::transport::Conn;
use crate::utils::metrics::global_metrics;

struct TcpSink(OwnedWriteHalf);

#[async_trait]
impl FrameSink for TcpSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        self.0.write_all(&frame).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.0.shutdown().await;
    }

    fn abort(self, reset: bool) {
        if reset {
            // RST instead of FIN once the read half is released too
            let _ = self.0.as_ref().set_linger(Some(Duration::ZERO));
        }
    }
}

/// A framed TCP connection
pub struct TcpConn<P = FrameCodec> {
    core: Arc<ConnCore>,
    reader: Mutex<Option<FramedRead<OwnedReadHalf, P>>>,
    parser: P,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl<P: Parser> TcpConn<P> {
    pub(crate) fn new(stream: TcpStream, parser: P, pending_write_num: usize) -> Arc<Self> {
        let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
        let local_addr = stream.local_addr().unwrap_or(unspecified);
        let remote_addr = stream.peer_addr().unwrap_or(unspecified);
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let core = ConnCore::spawn(TcpSink(write_half), pending_write_num);

        Arc::new(Self {
            core,
            reader: Mutex::new(Some(FramedRead::new(read_half, parser.clone()))),
            parser,
            local_addr,
            remote_addr,
        })
    }

    /// Parser used to frame outbound messages
    pub fn parser(&self) -> &P {
        &self.parser
    }
}

impl<P> CoreHandle for TcpConn<P> {
    fn core(&self) -> &Arc<ConnCore> {
        &self.core
    }
}

#[async_trait]
impl<P: Parser> Conn for TcpConn<P> {
    async fn read_msg(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock().await;
        let Some(framed) = reader.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        let next = tokio::select! {
            biased;
            _ = self.core.done().cancelled() => None,
            frame = framed.next() => frame,
        };

        match next {
            Some(Ok(frame)) => {
                global_metrics().frame_received(frame.len());
                Ok(frame)
            }
            Some(Err(e)) => {
                global_metrics().protocol_error();
                *reader = None;
                Err(e)
            }
            None => {
                *reader = None;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    fn write_msg(&self, parts: &[Bytes]) -> Result<()> {
        let frame = self.parser.frame(parts)?;
        self.core.write(frame);
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn close(&self) {
        self.core.close();
    }

    fn destroy(&self) {
        self.core.destroy();
    }
}
