//! Dial-and-reconnect driver shared by the TCP and WebSocket clients.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::{ProtocolError, Result};
use crate::transport::registry::{ConnRegistry, CoreHandle};
use crate::transport::{serve, Conn, NewAgent};

/// Normalized client options
#[derive(Clone)]
pub(crate) struct DialOptions {
    pub addr: String,
    pub conn_num: usize,
    pub connect_interval: Duration,
    pub auto_reconnect: bool,
}

impl DialOptions {
    /// Replace unusable values with defaults, logging each substitution.
    pub(crate) fn normalized(mut self) -> Self {
        if self.conn_num == 0 {
            self.conn_num = 1;
            info!(conn_num = self.conn_num, "invalid conn_num, reset");
        }
        if self.connect_interval.is_zero() {
            self.connect_interval = crate::utils::timeout::DEFAULT_CONNECT_INTERVAL;
            info!(
                connect_interval_ms = self.connect_interval.as_millis() as u64,
                "invalid connect_interval, reset"
            );
        }
        self
    }
}

/// Runtime state behind a client: one dial loop per configured connection
pub(crate) struct ClientCore<C> {
    opts: DialOptions,
    new_agent: NewAgent<C>,
    registry: ConnRegistry,
    closing: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl<C> ClientCore<C>
where
    C: Conn + CoreHandle,
{
    pub(crate) fn new(opts: DialOptions, new_agent: NewAgent<C>) -> Arc<Self> {
        Arc::new(Self {
            opts: opts.normalized(),
            new_agent,
            registry: ConnRegistry::unbounded(),
            closing: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn `conn_num` dial loops.
    ///
    /// `dial` opens one transport stream; `build` wraps it into a connection.
    pub(crate) fn start<S, D, Fut, B>(self: &Arc<Self>, dial: D, build: B) -> Result<()>
    where
        S: Send + 'static,
        D: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send,
        B: Fn(S) -> Arc<C> + Clone + Send + Sync + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::AlreadyStarted);
        }
        for _ in 0..self.opts.conn_num {
            let core = self.clone();
            let dial = dial.clone();
            let build = build.clone();
            self.tracker.spawn(async move { core.connect_loop(dial, build).await });
        }
        Ok(())
    }

    async fn connect_loop<S, D, Fut, B>(&self, dial: D, build: B)
    where
        D: Fn() -> Fut,
        Fut: Future<Output = Result<S>>,
        B: Fn(S) -> Arc<C>,
    {
        loop {
            let Some(stream) = self.dial_until_connected(&dial).await else {
                return;
            };

            let (id, conn) = match self.registry.admit(|| build(stream)) {
                Ok(admitted) => admitted,
                Err(_) => {
                    debug!(addr = %self.opts.addr, "client closing, dropping new connection");
                    return;
                }
            };
            serve(&self.registry, id, conn, &self.new_agent).await;

            if !self.opts.auto_reconnect {
                return;
            }
            tokio::select! {
                _ = self.closing.cancelled() => return,
                _ = tokio::time::sleep(self.opts.connect_interval) => {}
            }
        }
    }

    async fn dial_until_connected<S, D, Fut>(&self, dial: &D) -> Option<S>
    where
        D: Fn() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.closing.cancelled() => return None,
                res = dial() => res,
            };
            match attempt {
                Ok(stream) => return Some(stream),
                Err(e) => info!(addr = %self.opts.addr, error = %e, "connect failed"),
            }

            tokio::select! {
                _ = self.closing.cancelled() => return None,
                _ = tokio::time::sleep(self.opts.connect_interval) => {}
            }
        }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.opts.addr
    }

    pub(crate) fn conn_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop dialing, close every connection and wait for all loops to end.
    pub(crate) async fn close(&self) {
        self.closing.cancel();
        self.registry.close_all();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
