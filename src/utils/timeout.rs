//! Async timeout wrappers and the default intervals shared by transports.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default WebSocket upgrade deadline
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between client dial attempts
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Wrap a fallible future, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Like [`with_timeout_error`], but `None` waits forever.
pub async fn with_optional_timeout<F, T>(fut: F, duration: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(duration) => with_timeout_error(fut, duration).await,
        None => fut.await,
    }
}
