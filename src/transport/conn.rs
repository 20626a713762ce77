//! # Connection Write Pump
//!
//! Shared machinery behind every stream connection. Writers enqueue frames
//! into a bounded queue; a single pump task drains it onto the socket.
//!
//! ## Lifecycle
//! ```text
//! open --close()--> draining --pump drained--> closed
//!   \                  |
//!    +---destroy()-----+--------------------> closed (pending frames dropped)
//! ```
//!
//! A full queue never blocks the writer: the connection is destroyed instead.
//! Once closed, writes are silently discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::utils::metrics::global_metrics;

/// Item carried by the write queue
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Bytes),
    /// Finish draining, then shut the socket down gracefully
    Close,
}

/// Write side of a socket as seen by the pump
#[async_trait]
pub(crate) trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: Bytes) -> Result<()>;

    /// Graceful shutdown after the queue drained
    async fn shutdown(&mut self);

    /// Immediate teardown. `reset` asks for an abortive close where the
    /// transport supports one.
    fn abort(self, reset: bool)
    where
        Self: Sized;
}

struct QueueState {
    closed: bool,
    tx: Option<mpsc::Sender<Outbound>>,
}

/// State shared between a connection handle and its pump task
pub(crate) struct ConnCore {
    state: Mutex<QueueState>,
    reset: AtomicBool,
    kill: CancellationToken,
    done: CancellationToken,
}

impl ConnCore {
    /// Create the queue and spawn the pump over `sink`.
    ///
    /// `pending_write_num` is clamped to at least one slot.
    pub(crate) fn spawn<S: FrameSink>(sink: S, pending_write_num: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(pending_write_num.max(1));
        let core = Arc::new(Self {
            state: Mutex::new(QueueState {
                closed: false,
                tx: Some(tx),
            }),
            reset: AtomicBool::new(false),
            kill: CancellationToken::new(),
            done: CancellationToken::new(),
        });
        tokio::spawn(pump(sink, rx, core.clone()));
        core
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // a panic while holding the lock leaves the flags consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue one framed message. No-op once closed.
    pub(crate) fn write(&self, frame: Bytes) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        self.enqueue(&mut state, Outbound::Frame(frame));
    }

    /// Ask the pump to drain and shut down. Idempotent.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        self.enqueue(&mut state, Outbound::Close);
        state.closed = true;
    }

    /// Drop pending frames and reset the socket. Idempotent.
    pub(crate) fn destroy(&self) {
        let mut state = self.lock();
        self.teardown(&mut state, true);
    }

    /// Stop without draining and without an abortive reset.
    pub(crate) fn shutdown(&self) {
        let mut state = self.lock();
        self.teardown(&mut state, false);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Cancelled once the pump has exited and the socket is gone.
    pub(crate) fn done(&self) -> &CancellationToken {
        &self.done
    }

    fn enqueue(&self, state: &mut QueueState, item: Outbound) {
        let Some(tx) = state.tx.as_ref() else {
            return;
        };
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("close conn: channel full");
                global_metrics().queue_overflow();
                self.teardown(state, true);
            }
            // pump already gone
            Err(TrySendError::Closed(_)) => state.closed = true,
        }
    }

    fn teardown(&self, state: &mut QueueState, reset: bool) {
        if reset {
            self.reset.store(true, Ordering::Release);
        }
        state.tx = None;
        state.closed = true;
        self.kill.cancel();
    }

    fn mark_done(&self) {
        let mut state = self.lock();
        state.tx = None;
        state.closed = true;
        drop(state);
        self.done.cancel();
    }
}

async fn pump<S: FrameSink>(mut sink: S, mut rx: mpsc::Receiver<Outbound>, core: Arc<ConnCore>) {
    let killed = loop {
        let item = tokio::select! {
            biased;
            _ = core.kill.cancelled() => break true,
            item = rx.recv() => item,
        };

        let frame = match item {
            Some(Outbound::Frame(frame)) => frame,
            Some(Outbound::Close) | None => break false,
        };

        let len = frame.len();
        let sent = tokio::select! {
            biased;
            _ = core.kill.cancelled() => None,
            res = sink.send_frame(frame) => Some(res),
        };
        match sent {
            None => break true,
            Some(Ok(())) => global_metrics().frame_sent(len),
            Some(Err(e)) => {
                debug!(error = %e, "write failed, stopping pump");
                break true;
            }
        }
    };

    if killed {
        sink.abort(core.reset.load(Ordering::Acquire));
    } else {
        sink.shutdown().await;
    }
    core.mark_done();
}
