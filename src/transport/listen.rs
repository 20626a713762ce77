//! Accept loop shared by the TCP and WebSocket servers.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const MIN_ACCEPT_DELAY: Duration = Duration::from_millis(5);
const MAX_ACCEPT_DELAY: Duration = Duration::from_secs(1);

/// Retry delay after transient accept failures: 5ms doubling up to 1s.
#[derive(Debug, Default)]
pub(crate) struct AcceptBackoff {
    delay: Duration,
}

impl AcceptBackoff {
    pub(crate) fn next_delay(&mut self) -> Duration {
        self.delay = if self.delay.is_zero() {
            MIN_ACCEPT_DELAY
        } else {
            (self.delay * 2).min(MAX_ACCEPT_DELAY)
        };
        self.delay
    }

    pub(crate) fn reset(&mut self) {
        self.delay = Duration::ZERO;
    }
}

/// Accept failures worth retrying instead of stopping the listener.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut
    ) {
        return true;
    }
    // ENOMEM, ENFILE, EMFILE, ENOBUFS
    #[cfg(unix)]
    if let Some(code) = e.raw_os_error() {
        return matches!(code, 12 | 23 | 24 | 105);
    }
    false
}

/// Accept until `shutdown` fires or the listener fails permanently.
///
/// The listener is dropped when this returns.
pub(crate) async fn accept_loop<F>(listener: TcpListener, shutdown: CancellationToken, mut on_accept: F)
where
    F: FnMut(TcpStream, SocketAddr) + Send,
{
    let mut backoff = AcceptBackoff::default();
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, peer)) => {
                backoff.reset();
                on_accept(stream, peer);
            }
            Err(e) if is_transient(&e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "accept error, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                error!(error = %e, "accept failed, stopping listener");
                break;
            }
        }
    }
    debug!("listener stopped");
}
