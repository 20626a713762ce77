use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};

use crate::error::{ProtocolError, Result};
use crate::protocol::Payload;
use crate::transport::listen::accept_loop;
use crate::transport::registry::{ConnRegistry, Rejected};
use crate::transport::tcp::{DEFAULT_MAX_CONN_NUM, DEFAULT_PENDING_WRITE_NUM};
use crate::transport::tls::TlsServerConfig;
use crate::transport::ws::{real_remote_addr, WsConn, WsConnSettings};
use crate::transport::{serve, Agent, NewAgent};
use crate::utils::metrics::Timer;

/// Default read limit per message
pub const DEFAULT_WS_MAX_MSG_LEN: u32 = 1_024_000;

pub use crate::utils::timeout::DEFAULT_HTTP_TIMEOUT;

/// Upgrade-time authentication.
///
/// `Ok(user_data)` accepts the connection and attaches `user_data` to it;
/// `Err(reason)` answers the upgrade with `403 Forbidden`.
pub type WsAuth = Arc<dyn Fn(&Request) -> std::result::Result<Option<Payload>, String> + Send + Sync>;

struct Accepted {
    remote_addr: SocketAddr,
    user_data: Option<Payload>,
}

/// Everything a per-socket upgrade task needs
struct Upgrader {
    registry: Arc<ConnRegistry>,
    new_agent: NewAgent<WsConn>,
    auth: Option<WsAuth>,
    max_msg_len: u32,
    pending_write_num: usize,
    http_timeout: Duration,
    text_format: bool,
    shutdown: CancellationToken,
}

impl Upgrader {
    fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_msg_len as usize);
        config.max_frame_size = Some(self.max_msg_len as usize);
        config
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, tls: Option<TlsAcceptor>) {
        let local_addr = stream.local_addr().unwrap_or(peer);
        match tls {
            Some(acceptor) => {
                let accepted = tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    res = tokio::time::timeout(self.http_timeout, acceptor.accept(stream)) => res,
                };
                match accepted {
                    Ok(Ok(stream)) => self.upgrade_and_serve(stream, local_addr, peer).await,
                    Ok(Err(e)) => debug!(%peer, error = %e, "tls handshake failed"),
                    Err(_) => debug!(%peer, "tls handshake timed out"),
                }
            }
            None => self.upgrade_and_serve(stream, local_addr, peer).await,
        }
    }

    async fn upgrade_and_serve<S>(&self, stream: S, local_addr: SocketAddr, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut accepted: Option<Accepted> = None;
        let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            let user_data = match &self.auth {
                Some(auth) => auth(req).map_err(forbidden)?,
                None => None,
            };
            accepted = Some(Accepted {
                remote_addr: real_remote_addr(req.headers(), peer),
                user_data,
            });
            Ok(resp)
        };

        let handshake =
            tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(self.ws_config()));
        let upgraded = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            res = tokio::time::timeout(self.http_timeout, handshake) => res,
        };
        let ws = match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!(%peer, error = %e, "upgrade error");
                return;
            }
            Err(_) => {
                debug!(%peer, "upgrade timed out");
                return;
            }
        };
        let Some(accepted) = accepted else {
            return;
        };

        let settings = WsConnSettings {
            local_addr,
            remote_addr: accepted.remote_addr,
            max_msg_len: self.max_msg_len,
            pending_write_num: self.pending_write_num,
            text_format: self.text_format,
            user_data: accepted.user_data,
        };
        match self.registry.admit(|| WsConn::new(ws, settings)) {
            Ok((id, conn)) => serve(&self.registry, id, conn, &self.new_agent).await,
            Err(Rejected::Full) => debug!(%peer, "too many connections"),
            Err(Rejected::Closed) => debug!(%peer, "server closing, dropping connection"),
        }
    }
}

fn forbidden(reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Accepts WebSocket upgrades and runs one agent per admitted connection.
pub struct WsServer {
    addr: String,
    max_conn_num: usize,
    pending_write_num: usize,
    max_msg_len: u32,
    http_timeout: Duration,
    tls: Option<TlsServerConfig>,
    auth: Option<WsAuth>,
    text_format: bool,
    new_agent: NewAgent<WsConn>,
    registry: Arc<ConnRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl WsServer {
    pub fn new<F>(addr: impl Into<String>, new_agent: F) -> Self
    where
        F: Fn(Arc<WsConn>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            addr: addr.into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            max_msg_len: DEFAULT_WS_MAX_MSG_LEN,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            tls: None,
            auth: None,
            text_format: false,
            new_agent: Arc::new(new_agent),
            registry: Arc::new(ConnRegistry::new(DEFAULT_MAX_CONN_NUM)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    pub fn with_max_conn_num(mut self, max_conn_num: usize) -> Self {
        self.max_conn_num = max_conn_num;
        self
    }

    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num;
        self
    }

    /// Largest accepted message, inbound and outbound
    pub fn with_max_msg_len(mut self, max_msg_len: u32) -> Self {
        self.max_msg_len = max_msg_len;
        self
    }

    /// Deadline for the TLS and WebSocket handshakes
    pub fn with_http_timeout(mut self, http_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self
    }

    /// Terminate TLS with the given certificate and key
    pub fn with_tls(mut self, tls: TlsServerConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_auth(mut self, auth: WsAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Send text messages instead of binary ones
    pub fn with_text_format(mut self, text_format: bool) -> Self {
        self.text_format = text_format;
        self
    }

    fn normalize(&mut self) {
        if self.max_conn_num == 0 {
            self.max_conn_num = DEFAULT_MAX_CONN_NUM;
            info!(max_conn_num = self.max_conn_num, "invalid max_conn_num, reset");
        }
        if self.pending_write_num == 0 {
            self.pending_write_num = DEFAULT_PENDING_WRITE_NUM;
            info!(pending_write_num = self.pending_write_num, "invalid pending_write_num, reset");
        }
        if self.max_msg_len == 0 {
            self.max_msg_len = DEFAULT_WS_MAX_MSG_LEN;
            info!(max_msg_len = self.max_msg_len, "invalid max_msg_len, reset");
        }
        if self.http_timeout.is_zero() {
            self.http_timeout = DEFAULT_HTTP_TIMEOUT;
            info!(http_timeout_ms = self.http_timeout.as_millis() as u64, "invalid http_timeout, reset");
        }
    }

    /// Load TLS material, bind the listener and start accepting.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Err(ProtocolError::AlreadyStarted);
        }
        self.normalize();

        let acceptor = self.tls.as_ref().map(TlsServerConfig::acceptor).transpose()?;
        let listener = TcpListener::bind(&self.addr).await?;
        self.local_addr = listener.local_addr().ok();
        self.registry = Arc::new(ConnRegistry::new(self.max_conn_num));
        info!(local_addr = ?self.local_addr, tls = acceptor.is_some(), "websocket server listening");

        let upgrader = Arc::new(Upgrader {
            registry: self.registry.clone(),
            new_agent: self.new_agent.clone(),
            auth: self.auth.clone(),
            max_msg_len: self.max_msg_len,
            pending_write_num: self.pending_write_num,
            http_timeout: self.http_timeout,
            text_format: self.text_format,
            shutdown: self.shutdown.clone(),
        });
        let tracker = self.tracker.clone();

        let on_accept = move |stream: TcpStream, peer: SocketAddr| {
            let upgrader = upgrader.clone();
            let tls = acceptor.clone();
            tracker.spawn(async move { upgrader.handle(stream, peer, tls).await });
        };
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.shutdown.clone(),
            on_accept,
        )));
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn conn_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting, close every connection and wait for all agents and
    /// pending upgrades to finish.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn close(&mut self) {
        let _timer = Timer::start("ws_server_close");
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
