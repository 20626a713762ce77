use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::core::codec::{FrameCodec, Parser};
use crate::error::{ProtocolError, Result};
use crate::transport::dial::{ClientCore, DialOptions};
use crate::transport::tcp::{TcpConn, DEFAULT_PENDING_WRITE_NUM};
use crate::transport::{Agent, NewAgent};
use crate::utils::timeout::DEFAULT_CONNECT_INTERVAL;

/// Dials a TCP server with `conn_num` independent connections.
pub struct TcpClient<P = FrameCodec> {
    opts: DialOptions,
    pending_write_num: usize,
    parser: P,
    new_agent: NewAgent<TcpConn<P>>,
    core: Option<Arc<ClientCore<TcpConn<P>>>>,
}

impl TcpClient<FrameCodec> {
    pub fn new<F>(addr: impl Into<String>, new_agent: F) -> Self
    where
        F: Fn(Arc<TcpConn>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self::with_parser(addr, FrameCodec::default(), new_agent)
    }
}

impl<P: Parser> TcpClient<P> {
    pub fn with_parser<F>(addr: impl Into<String>, parser: P, new_agent: F) -> Self
    where
        F: Fn(Arc<TcpConn<P>>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            opts: DialOptions {
                addr: addr.into(),
                conn_num: 1,
                connect_interval: DEFAULT_CONNECT_INTERVAL,
                auto_reconnect: false,
            },
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            parser,
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

    /// Spawn the dial loops. Fails with `AlreadyStarted` on a second call.
    pub fn start(&mut self) -> Result<()> {
        let core = self
            .core
            .get_or_insert_with(|| ClientCore::new(self.opts.clone(), self.new_agent.clone()))
            .clone();

        let addr = core.addr().to_string();
        let dial = move || {
            let addr = addr.clone();
            async move { TcpStream::connect(addr).await.map_err(ProtocolError::from) }
        };

        let parser = self.parser.clone();
        let pending_write_num = self.pending_write_num;
        let build = move |stream: TcpStream| TcpConn::new(stream, parser.clone(), pending_write_num);

        core.start(dial, build)
    }

    /// Number of live connections
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
