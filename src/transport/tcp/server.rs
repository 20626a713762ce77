use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument};

use crate::core::codec::{FrameCodec, Parser};
use crate::error::{ProtocolError, Result};
use crate::transport::listen::accept_loop;
use crate::transport::registry::{ConnRegistry, Rejected};
use crate::transport::tcp::TcpConn;
use crate::transport::{serve, Agent, NewAgent};
use crate::utils::metrics::Timer;

/// Default admission limit
pub const DEFAULT_MAX_CONN_NUM: usize = 100;

/// Default write queue capacity per connection
pub const DEFAULT_PENDING_WRITE_NUM: usize = 100;

/// Accepts TCP connections and runs one agent per admitted socket.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use leafnet::transport::tcp::{TcpConn, TcpServer};
/// use leafnet::transport::{Agent, Conn};
///
/// struct Echo(Arc<TcpConn>);
///
/// #[async_trait::async_trait]
/// impl Agent for Echo {
///     async fn run(&self) {
///         while let Ok(msg) = self.0.read_msg().await {
///             if self.0.write_msg(&[msg]).is_err() {
///                 break;
///             }
///         }
///     }
///     async fn on_close(&self) {}
/// }
///
/// # async fn demo() -> leafnet::error::Result<()> {
/// let mut server = TcpServer::new("127.0.0.1:3563", |conn| Arc::new(Echo(conn)) as Arc<dyn Agent>);
/// server.start().await?;
/// // ...
/// server.close().await;
/// # Ok(())
/// # }
/// ```
pub struct TcpServer<P = FrameCodec> {
    addr: String,
    max_conn_num: usize,
    pending_write_num: usize,
    parser: P,
    new_agent: NewAgent<TcpConn<P>>,
    registry: Arc<ConnRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TcpServer<FrameCodec> {
    /// Server using the default 2-byte big-endian frame codec
    pub fn new<F>(addr: impl Into<String>, new_agent: F) -> Self
    where
        F: Fn(Arc<TcpConn>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self::with_parser(addr, FrameCodec::default(), new_agent)
    }
}

impl<P: Parser> TcpServer<P> {
    pub fn with_parser<F>(addr: impl Into<String>, parser: P, new_agent: F) -> Self
    where
        F: Fn(Arc<TcpConn<P>>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            addr: addr.into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            parser,
            new_agent: Arc::new(new_agent),
            registry: Arc::new(ConnRegistry::new(DEFAULT_MAX_CONN_NUM)),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Set the admission limit. Zero falls back to the default.
    pub fn with_max_conn_num(mut self, max_conn_num: usize) -> Self {
        self.max_conn_num = max_conn_num;
        self
    }

    /// Set the per-connection write queue capacity. Zero falls back to the default.
    pub fn with_pending_write_num(mut self, pending_write_num: usize) -> Self {
        self.pending_write_num = pending_write_num;
        self
    }

    /// Bind the listener and start accepting.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Err(ProtocolError::AlreadyStarted);
        }
        if self.max_conn_num == 0 {
            self.max_conn_num = DEFAULT_MAX_CONN_NUM;
            info!(max_conn_num = self.max_conn_num, "invalid max_conn_num, reset");
        }
        if self.pending_write_num == 0 {
            self.pending_write_num = DEFAULT_PENDING_WRITE_NUM;
            info!(pending_write_num = self.pending_write_num, "invalid pending_write_num, reset");
        }

        let listener = TcpListener::bind(&self.addr).await?;
        self.local_addr = listener.local_addr().ok();
        self.registry = Arc::new(ConnRegistry::new(self.max_conn_num));
        info!(local_addr = ?self.local_addr, "tcp server listening");

        let registry = self.registry.clone();
        let tracker = self.tracker.clone();
        let parser = self.parser.clone();
        let new_agent = self.new_agent.clone();
        let pending_write_num = self.pending_write_num;

        let on_accept = move |stream: TcpStream, peer: SocketAddr| {
            let parser = parser.clone();
            match registry.admit(|| TcpConn::new(stream, parser, pending_write_num)) {
                Ok((id, conn)) => {
                    let registry = registry.clone();
                    let new_agent = new_agent.clone();
                    tracker.spawn(async move { serve(&registry, id, conn, &new_agent).await });
                }
                Err(Rejected::Full) => debug!(%peer, "too many connections"),
                Err(Rejected::Closed) => debug!(%peer, "server closing, dropping connection"),
            }
        };
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.shutdown.clone(),
            on_accept,
        )));
        Ok(())
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of registered connections
    pub fn conn_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting, close every connection and wait for all agents to finish.
    #[instrument(skip(self), fields(addr = %self.addr))]
    pub async fn close(&mut self) {
        let _timer = Timer::start("tcp_server_close");
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
