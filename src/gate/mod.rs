//! # Gate
//!
//! Ready-made modules that put a processor behind real sockets.
//!
//! - [`Gate`]: listens on TCP and/or WebSocket and runs a [`GateAgent`] per
//!   connection
//! - [`ClientGate`]: the dialing counterpart, over TCP or WebSocket
//!
//! Agents announce themselves on the agent RPC sink: `"NewAgent"` is sent
//! fire-and-forget when an agent is created, `"CloseAgent"` is delivered
//! synchronously after its connection has closed. Both carry the agent as
//! their only argument.

mod agent;
mod client;

pub use agent::GateAgent;
pub use client::ClientGate;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::GateConfig;
use crate::core::codec::{FrameCodec, DEFAULT_LEN_MSG_LEN, DEFAULT_MAX_MSG_LEN};
use crate::core::ByteOrder;
use crate::error::Result;
use crate::module::Module;
use crate::protocol::{Processor, RpcSink};
use crate::transport::tcp::{TcpConn, TcpServer, DEFAULT_MAX_CONN_NUM, DEFAULT_PENDING_WRITE_NUM};
use crate::transport::tls::TlsServerConfig;
use crate::transport::ws::{WsAuth, WsConn, WsServer, DEFAULT_HTTP_TIMEOUT, DEFAULT_WS_MAX_MSG_LEN};
use crate::transport::{Agent, Conn};
use agent::GateShared;

/// Event fired with the new agent as soon as it is created
pub const AGENT_CREATED_EVENT: &str = "NewAgent";

/// Event delivered with the agent after its connection closed
pub const AGENT_BEFORE_CLOSE_EVENT: &str = "CloseAgent";

#[derive(Default)]
struct BoundAddrs {
    tcp: Option<SocketAddr>,
    ws: Option<SocketAddr>,
}

/// Server-side gate over TCP, WebSocket or both.
pub struct Gate {
    name: String,
    tcp_addr: Option<String>,
    ws_addr: Option<String>,
    max_conn_num: usize,
    pending_write_num: usize,
    max_msg_len: u32,
    len_msg_len: usize,
    byte_order: ByteOrder,
    http_timeout: Duration,
    text_format: bool,
    tls: Option<TlsServerConfig>,
    auth: Option<WsAuth>,
    processor: Option<Arc<dyn Processor>>,
    agent_rpc: Option<Arc<dyn RpcSink>>,
    bound: Mutex<BoundAddrs>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            name: "gate".into(),
            tcp_addr: None,
            ws_addr: None,
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            max_msg_len: 0,
            len_msg_len: DEFAULT_LEN_MSG_LEN,
            byte_order: ByteOrder::Big,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            text_format: false,
            tls: None,
            auth: None,
            processor: None,
            agent_rpc: None,
            bound: Mutex::new(BoundAddrs::default()),
        }
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gate from its configuration section.
    ///
    /// Fails when only one of `cert_file` / `key_file` is set.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(Self {
            tcp_addr: non_empty(&config.tcp_addr),
            ws_addr: non_empty(&config.ws_addr),
            max_conn_num: config.max_conn_num,
            pending_write_num: config.pending_write_num,
            max_msg_len: config.max_msg_len,
            len_msg_len: config.len_msg_len,
            byte_order: ByteOrder::from_little_endian(config.little_endian),
            http_timeout: config.http_timeout,
            text_format: config.text_format,
            tls: TlsServerConfig::from_paths(&config.cert_file, &config.key_file)?,
            ..Self::default()
        })
    }

    /// Module name reported to the supervisor
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tcp_addr(mut self, addr: impl Into<String>) -> Self {
        self.tcp_addr = Some(addr.into());
        self
    }

    pub fn with_ws_addr(mut self, addr: impl Into<String>) -> Self {
        self.ws_addr = Some(addr.into());
        self
    }

    pub fn with_max_conn_num(mut self, max_conn_num: usize) -> Self {
        self.max_conn_num = max_conn_num;
        self
    }

    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num;
        self
    }

    /// Largest message on either transport. Zero keeps each transport's default.
    pub fn with_max_msg_len(mut self, max_msg_len: u32) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }

    /// TCP length prefix width and byte order
    pub fn with_framing(mut self, len_msg_len: usize, byte_order: ByteOrder) -> Self {
        self.len_msg_len = len_msg_len;
        self.byte_order = byte_order;
        self
    }

    pub fn with_http_timeout(mut self, http_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self
    }

    pub fn with_text_format(mut self, text_format: bool) -> Self {
        self.text_format = text_format;
        self
    }

    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Authenticate WebSocket upgrades. The returned value becomes the
    /// agent's initial user data.
    pub fn with_auth(mut self, auth: WsAuth) -> Self {
        self.auth = Some(auth);
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

    /// TCP address actually bound while running
    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.bound().tcp
    }

    /// WebSocket address actually bound while running
    pub fn ws_local_addr(&self) -> Option<SocketAddr> {
        self.bound().ws
    }

    fn bound(&self) -> std::sync::MutexGuard<'_, BoundAddrs> {
        self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shared(&self) -> Arc<GateShared> {
        Arc::new(GateShared {
            processor: self.processor.clone(),
            agent_rpc: self.agent_rpc.clone(),
        })
    }

    fn tcp_server(&self, shared: &Arc<GateShared>) -> Result<Option<TcpServer>> {
        let Some(addr) = &self.tcp_addr else {
            return Ok(None);
        };
        let max_msg_len = match self.max_msg_len {
            0 => DEFAULT_MAX_MSG_LEN,
            len => len,
        };
        let parser = FrameCodec::new(self.len_msg_len, 0, max_msg_len)?.with_byte_order(self.byte_order);

        let shared = shared.clone();
        let server = TcpServer::with_parser(addr.clone(), parser, move |conn: Arc<TcpConn>| {
            GateAgent::spawn(conn as Arc<dyn Conn>, None, shared.clone())
        })
        .with_max_conn_num(self.max_conn_num)
        .with_pending_write_num(self.pending_write_num);
        Ok(Some(server))
    }

    fn ws_server(&self, shared: &Arc<GateShared>) -> Option<WsServer> {
        let addr = self.ws_addr.as_ref()?;
        let max_msg_len = match self.max_msg_len {
            0 => DEFAULT_WS_MAX_MSG_LEN,
            len => len,
        };

        let shared = shared.clone();
        let mut server = WsServer::new(addr.clone(), move |conn: Arc<WsConn>| -> Arc<dyn Agent> {
            let user_data = conn.user_data();
            GateAgent::spawn(conn as Arc<dyn Conn>, user_data, shared.clone())
        })
        .with_max_conn_num(self.max_conn_num)
        .with_pending_write_num(self.pending_write_num)
        .with_max_msg_len(max_msg_len)
        .with_http_timeout(self.http_timeout)
        .with_text_format(self.text_format);
        if let Some(tls) = &self.tls {
            server = server.with_tls(tls.clone());
        }
        if let Some(auth) = &self.auth {
            server = server.with_auth(auth.clone());
        }
        Some(server)
    }
}

#[async_trait]
impl Module for Gate {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(gate = %self.name))]
    async fn run(&self, close_sig: CancellationToken) -> Result<()> {
        let shared = self.shared();
        let mut tcp = self.tcp_server(&shared)?;
        let mut ws = self.ws_server(&shared);

        if let Some(server) = ws.as_mut() {
            server.start().await?;
            self.bound().ws = server.local_addr();
        }
        if let Some(server) = tcp.as_mut() {
            if let Err(e) = server.start().await {
                if let Some(ws) = ws.as_mut() {
                    ws.close().await;
                }
                self.bound().ws = None;
                return Err(e);
            }
            self.bound().tcp = server.local_addr();
        }
        info!(tcp = ?self.tcp_local_addr(), ws = ?self.ws_local_addr(), "gate running");

        close_sig.cancelled().await;

        if let Some(server) = ws.as_mut() {
            server.close().await;
        }
        if let Some(server) = tcp.as_mut() {
            server.close().await;
        }
        *self.bound() = BoundAddrs::default();
        info!("gate closed");
        Ok(())
    }
}
