use crate::error::{ProtocolError, Result};
use crate::protocol::{Payload, RpcSink};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::error;

type HandlerFn = dyn Fn(Vec<Payload>) -> Result<()> + Send + Sync + 'static;

/// Event dispatcher keyed by event name.
/// Uses Cow<'static, str> to avoid heap allocations for static event names.
///
/// Handlers run on the caller's task: `go` and `call0` differ only in
/// whether the handler's error is returned or logged.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Arc<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, event: impl Into<Cow<'static, str>>, handler: F) -> Result<()>
    where
        F: Fn(Vec<Payload>) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::RpcError("Failed to acquire write lock on dispatcher".to_string())
        })?;

        handlers.insert(event.into(), Arc::new(handler));
        Ok(())
    }

    pub fn dispatch(&self, event: &str, args: Vec<Payload>) -> Result<()> {
        // handler runs without the lock held
        let handler = {
            let handlers = self.handlers.read().map_err(|_| {
                ProtocolError::RpcError("Failed to acquire read lock on dispatcher".to_string())
            })?;
            handlers
                .get(event)
                .cloned()
                .ok_or_else(|| ProtocolError::RpcError(format!("event {event} not registered")))?
        };

        handler(args)
    }
}

impl RpcSink for Dispatcher {
    fn go(&self, event: &str, args: Vec<Payload>) {
        if let Err(e) = self.dispatch(event, args) {
            error!(event, error = %e, "event handler failed");
        }
    }

    fn call0(&self, event: &str, args: Vec<Payload>) -> Result<()> {
        self.dispatch(event, args)
    }
}
