use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ProtocolError, Result};
use crate::transport::dial::{ClientCore, DialOptions};
use crate::transport::tcp::DEFAULT_PENDING_WRITE_NUM;
use crate::transport::ws::{WsConn, WsConnSettings, DEFAULT_HTTP_TIMEOUT, DEFAULT_WS_MAX_MSG_LEN};
use crate::transport::{Agent, NewAgent};
use crate::utils::timeout::{with_timeout_error, DEFAULT_CONNECT_INTERVAL};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials a WebSocket server (`ws://host:port/path`) with `conn_num`
/// independent connections.
pub struct WsClient {
    opts: DialOptions,
    pending_write_num: usize,
    max_msg_len: u32,
    handshake_timeout: Duration,
    text_format: bool,
    new_agent: NewAgent<WsConn>,
    core: Option<Arc<ClientCore<WsConn>>>,
}

impl WsClient {
    pub fn new<F>(url: impl Into<String>, new_agent: F) -> Self
    where
        F: Fn(Arc<WsConn>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            opts: DialOptions {
                addr: url.into(),
                conn_num: 1,
                connect_interval: DEFAULT_CONNECT_INTERVAL,
                auto_reconnect: false,
            },
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            max_msg_len: DEFAULT_WS_MAX_MSG_LEN,
            handshake_timeout: DEFAULT_HTTP_TIMEOUT,
            text_format: false,
            new_agent: Arc::new(new_agent),
            core: None,
        }
    }

    pub fn with_conn_num(mut self, conn_num: usize) -> Self {
        self.opts.conn_num = conn_num;
        self
    }

    pub fn with_connect_interval(mut self, connect_interval: Duration) -> Self {
        self.opts.connect_interval = connect_interval;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.opts.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num.max(1);
        self
    }

    pub fn with_max_msg_len(mut self, max_msg_len: u32) -> Self {
        if max_msg_len > 0 {
            self.max_msg_len = max_msg_len;
        }
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        if !handshake_timeout.is_zero() {
            self.handshake_timeout = handshake_timeout;
        }
        self
    }

    pub fn with_text_format(mut self, text_format: bool) -> Self {
        self.text_format = text_format;
        self
    }

    /// Spawn the dial loops. Fails with `AlreadyStarted` on a second call.
    pub fn start(&mut self) -> Result<()> {
        let core = self
            .core
            .get_or_insert_with(|| ClientCore::new(self.opts.clone(), self.new_agent.clone()))
            .clone();

        let url = core.addr().to_string();
        let max_msg_len = self.max_msg_len as usize;
        let handshake_timeout = self.handshake_timeout;
        let dial = move || {
            let url = url.clone();
            let mut config = WebSocketConfig::default();
            config.max_message_size = Some(max_msg_len);
            config.max_frame_size = Some(max_msg_len);
            async move {
                let connect = async {
                    tokio_tungstenite::connect_async_with_config(url, Some(config), true)
                        .await
                        .map_err(ProtocolError::from)
                };
                let (ws, _response) = with_timeout_error(connect, handshake_timeout).await?;
                Ok::<_, ProtocolError>(ws)
            }
        };

        let settings = (self.max_msg_len, self.pending_write_num, self.text_format);
        let build = move |ws: ClientStream| {
            let (max_msg_len, pending_write_num, text_format) = settings;
            let (local_addr, remote_addr) = stream_addrs(&ws);
            WsConn::new(
                ws,
                WsConnSettings {
                    local_addr,
                    remote_addr,
                    max_msg_len,
                    pending_write_num,
                    text_format,
                    user_data: None,
                },
            )
        };

        core.start(dial, build)
    }

    pub fn conn_count(&self) -> usize {
        self.core.as_ref().map_or(0, |core| core.conn_count())
    }

    /// Stop dialing, close every connection and wait for every loop to end.
    pub async fn close(&self) {
        if let Some(core) = &self.core {
            core.close().await;
        }
    }
}

fn stream_addrs(ws: &ClientStream) -> (SocketAddr, SocketAddr) {
    let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
    match ws.get_ref() {
        MaybeTlsStream::Plain(stream) => (
            stream.local_addr().unwrap_or(unspecified),
            stream.peer_addr().unwrap_or(unspecified),
        ),
        _ => (unspecified, unspecified),
    }
}
