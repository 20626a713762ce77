//! # WebSocket Transport
//!
//! One WebSocket message per application message. The server upgrades plain
//! or TLS streams and applies an optional authentication callback to the
//! upgrade request; the client dials `ws://` URLs.

mod client;
mod server;

pub use client::WsClient;
pub use server::{WsAuth, WsServer, DEFAULT_HTTP_TIMEOUT, DEFAULT_WS_MAX_MSG_LEN};
pub use tokio_tungstenite::tungstenite::handshake::server::Request as UpgradeRequest;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::core::merge_bytes;
use crate::error::{ProtocolError, Result};
use crate::protocol::Payload;
use crate::transport::conn::{ConnCore, FrameSink};
use crate::transport::registry::CoreHandle;
use crate::transport::Conn;
use crate::utils::metrics::global_metrics;

type MessageStream = BoxStream<'static, std::result::Result<Message, tungstenite::Error>>;

struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    text_format: bool,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        let message = if self.text_format {
            let text = String::from_utf8(frame.to_vec())
                .map_err(|e| ProtocolError::WebSocketError(format!("text frame is not utf-8: {e}")))?;
            Message::Text(text)
        } else {
            Message::Binary(frame.to_vec())
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.sink.close().await;
    }

    fn abort(self, _reset: bool) {}
}

/// Settings a [`WsConn`] is built with
pub(crate) struct WsConnSettings {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub max_msg_len: u32,
    pub pending_write_num: usize,
    pub text_format: bool,
    pub user_data: Option<Payload>,
}

/// A WebSocket connection
pub struct WsConn {
    core: Arc<ConnCore>,
    reader: Mutex<Option<MessageStream>>,
    max_msg_len: u32,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    user_data: Option<Payload>,
}

impl WsConn {
    pub(crate) fn new<S>(ws: WebSocketStream<S>, settings: WsConnSettings) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let core = ConnCore::spawn(
            WsSink {
                sink,
                text_format: settings.text_format,
            },
            settings.pending_write_num,
        );

        Arc::new(Self {
            core,
            reader: Mutex::new(Some(stream.boxed())),
            max_msg_len: settings.max_msg_len,
            local_addr: settings.local_addr,
            remote_addr: settings.remote_addr,
            user_data: settings.user_data,
        })
    }

    /// Value returned by the server's auth callback for this connection
    pub fn user_data(&self) -> Option<Payload> {
        self.user_data.clone()
    }
}

impl CoreHandle for WsConn {
    fn core(&self) -> &Arc<ConnCore> {
        &self.core
    }
}

#[async_trait]
impl Conn for WsConn {
    async fn read_msg(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock().await;
        loop {
            let Some(stream) = reader.as_mut() else {
                return Err(ProtocolError::ConnectionClosed);
            };

            let next = tokio::select! {
                biased;
                _ = self.core.done().cancelled() => None,
                message = stream.next() => message,
            };

            let data = match next {
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                // control frames are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    *reader = None;
                    return Err(ProtocolError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    *reader = None;
                    return Err(e.into());
                }
            };
            global_metrics().frame_received(data.len());
            return Ok(data);
        }
    }

    fn write_msg(&self, parts: &[Bytes]) -> Result<()> {
        let len: usize = parts.iter().map(Bytes::len).sum();
        if len > self.max_msg_len as usize {
            return Err(ProtocolError::MessageTooLong(len));
        }
        if len < 1 {
            return Err(ProtocolError::MessageTooShort(len));
        }

        self.core.write(merge_bytes(parts));
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

/// Client address as reported by a fronting proxy, falling back to the peer.
///
/// `X-Forwarded-For` (first entry) wins over `X-Real-IP`. The peer port is kept.
pub(crate) fn real_remote_addr(headers: &HeaderMap, peer: SocketAddr) -> SocketAddr {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let forwarded = header("x-forwarded-for").and_then(|v| v.split(',').next());
    let real_ip = header("x-real-ip");

    forwarded
        .into_iter()
        .chain(real_ip)
        .find_map(|ip| ip.trim().parse::<IpAddr>().ok())
        .map_or(peer, |ip| SocketAddr::new(ip, peer.port()))
}
