use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::core::codec::{FrameCodec, DEFAULT_MAX_MSG_LEN, DEFAULT_MIN_MSG_LEN};
use crate::core::ByteOrder;
use crate::error::Result;
use crate::gate::agent::{GateAgent, GateShared};
use crate::module::Module;
use crate::protocol::{Processor, RpcSink};
use crate::transport::tcp::{TcpClient, TcpConn, DEFAULT_PENDING_WRITE_NUM};
use crate::transport::ws::{WsClient, WsConn, DEFAULT_HTTP_TIMEOUT, DEFAULT_WS_MAX_MSG_LEN};
use crate::transport::Conn;
use crate::utils::timeout::DEFAULT_CONNECT_INTERVAL;

enum Dialer {
    Tcp {
        addr: String,
        parser: FrameCodec,
    },
    Ws {
        url: String,
        http_timeout: Duration,
        max_msg_len: u32,
        text_format: bool,
    },
}

/// Client-side gate: dials one server and runs a [`GateAgent`] per connection.
pub struct ClientGate {
    name: String,
    dialer: Dialer,
    conn_num: usize,
    connect_interval: Duration,
    auto_reconnect: bool,
    pending_write_num: usize,
    processor: Option<Arc<dyn Processor>>,
    agent_rpc: Option<Arc<dyn RpcSink>>,
}

impl ClientGate {
    fn with_dialer(dialer: Dialer) -> Self {
        Self {
            name: "client_gate".into(),
            dialer,
            conn_num: 1,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            auto_reconnect: false,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            processor: None,
            agent_rpc: None,
        }
    }

    /// Dial `addr` over TCP with the default frame codec
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::with_dialer(Dialer::Tcp {
            addr: addr.into(),
            parser: FrameCodec::default(),
        })
    }

    /// Dial a `ws://` URL
    pub fn ws(url: impl Into<String>) -> Self {
        Self::with_dialer(Dialer::Ws {
            url: url.into(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_msg_len: DEFAULT_WS_MAX_MSG_LEN,
            text_format: false,
        })
    }

    /// Build from the client configuration section. A `ws://` address
    /// selects WebSocket, anything else TCP.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let gate = if config.addr.starts_with("ws://") {
            Self::ws(config.addr.clone())
                .with_http_timeout(config.http_timeout)
                .with_max_msg_len(config.max_msg_len)
        } else {
            let max_msg_len = match config.max_msg_len {
                0 => DEFAULT_MAX_MSG_LEN,
                len => len,
            };
            let parser = FrameCodec::new(config.len_msg_len, DEFAULT_MIN_MSG_LEN, max_msg_len)?
                .with_byte_order(ByteOrder::from_little_endian(config.little_endian));
            Self::tcp(config.addr.clone()).with_parser(parser)
        };
        Ok(gate
            .with_conn_num(config.conn_num)
            .with_connect_interval(config.connect_interval)
            .with_auto_reconnect(config.auto_reconnect)
            .with_pending_write_num(config.pending_write_num))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Frame codec for TCP. Ignored for WebSocket.
    pub fn with_parser(mut self, codec: FrameCodec) -> Self {
        if let Dialer::Tcp { parser, .. } = &mut self.dialer {
            *parser = codec;
        }
        self
    }

    /// Handshake deadline for WebSocket. Ignored for TCP.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        if let Dialer::Ws { http_timeout, .. } = &mut self.dialer {
            *http_timeout = timeout;
        }
        self
    }

    /// Largest WebSocket message. Ignored for TCP, whose codec carries its own.
    pub fn with_max_msg_len(mut self, len: u32) -> Self {
        if let Dialer::Ws { max_msg_len, .. } = &mut self.dialer {
            *max_msg_len = len;
        }
        self
    }

    pub fn with_text_format(mut self, text: bool) -> Self {
        if let Dialer::Ws { text_format, .. } = &mut self.dialer {
            *text_format = text;
        }
        self
    }

    pub fn with_conn_num(mut self, conn_num: usize) -> Self {
        self.conn_num = conn_num;
        self
    }

    pub fn with_connect_interval(mut self, connect_interval: Duration) -> Self {
        self.connect_interval = connect_interval;
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_agent_rpc(mut self, agent_rpc: Arc<dyn RpcSink>) -> Self {
        self.agent_rpc = Some(agent_rpc);
        self
    }

    fn shared(&self) -> Arc<GateShared> {
        Arc::new(GateShared {
            processor: self.processor.clone(),
            agent_rpc: self.agent_rpc.clone(),
        })
    }
}

#[async_trait]
impl Module for ClientGate {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(gate = %self.name))]
    async fn run(&self, close_sig: CancellationToken) -> Result<()> {
        let shared = self.shared();
        match &self.dialer {
            Dialer::Tcp { addr, parser } => {
                let mut client = TcpClient::with_parser(addr.clone(), parser.clone(), move |conn: Arc<TcpConn>| {
                    GateAgent::spawn(conn as Arc<dyn Conn>, None, shared.clone())
                })
                .with_conn_num(self.conn_num)
                .with_connect_interval(self.connect_interval)
                .with_auto_reconnect(self.auto_reconnect)
                .with_pending_write_num(self.pending_write_num);
                client.start()?;
                info!(%addr, "client gate dialing");
                close_sig.cancelled().await;
                client.close().await;
            }
            Dialer::Ws {
                url,
                http_timeout,
                max_msg_len,
                text_format,
            } => {
                let mut client = WsClient::new(url.clone(), move |conn: Arc<WsConn>| {
                    GateAgent::spawn(conn as Arc<dyn Conn>, None, shared.clone())
                })
                .with_conn_num(self.conn_num)
                .with_connect_interval(self.connect_interval)
                .with_auto_reconnect(self.auto_reconnect)
                .with_pending_write_num(self.pending_write_num)
                .with_handshake_timeout(*http_timeout)
                .with_max_msg_len(*max_msg_len)
                .with_text_format(*text_format);
                client.start()?;
                info!(%url, "client gate dialing");
                close_sig.cancelled().await;
                client.close().await;
            }
        }
        info!("client gate closed");
        Ok(())
    }
}
