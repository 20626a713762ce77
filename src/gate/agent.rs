use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::gate::{AGENT_BEFORE_CLOSE_EVENT, AGENT_CREATED_EVENT};
use crate::protocol::{Payload, Processor, RpcSink};
use crate::transport::{Agent, Conn};

/// What every agent of one gate shares: the codec and the event sink.
pub(crate) struct GateShared {
    pub(crate) processor: Option<Arc<dyn Processor>>,
    pub(crate) agent_rpc: Option<Arc<dyn RpcSink>>,
}

/// Agent that decodes every inbound frame with the gate's processor and
/// routes it with itself as the context.
///
/// Handlers receive the context as a [`Payload`]; downcast it to
/// `GateAgent` to reply:
///
/// ```rust,ignore
/// processor.set_handler::<Ping, _>(|ping, ctx| {
///     if let Some(agent) = ctx.downcast_ref::<GateAgent>() {
///         agent.write_msg(&Pong { seq: ping.seq });
///     }
/// })?;
/// ```
pub struct GateAgent {
    conn: Arc<dyn Conn>,
    shared: Arc<GateShared>,
    user_data: Mutex<Option<Payload>>,
    this: Weak<GateAgent>,
}

impl GateAgent {
    /// Build the agent and announce it with the created event.
    pub(crate) fn spawn(
        conn: Arc<dyn Conn>,
        user_data: Option<Payload>,
        shared: Arc<GateShared>,
    ) -> Arc<dyn Agent> {
        let agent = Arc::new_cyclic(|this| Self {
            conn,
            shared,
            user_data: Mutex::new(user_data),
            this: this.clone(),
        });
        if let Some(rpc) = &agent.shared.agent_rpc {
            rpc.go(AGENT_CREATED_EVENT, vec![agent.clone() as Payload]);
        }
        agent
    }

    fn as_payload(&self) -> Option<Payload> {
        self.this.upgrade().map(|agent| agent as Payload)
    }

    /// Marshal `msg` and queue it. Failures are logged, never returned.
    pub fn write_msg(&self, msg: &dyn Any) {
        let Some(processor) = &self.shared.processor else {
            return;
        };
        let parts = match processor.marshal(msg) {
            Ok(parts) => parts,
            Err(e) => {
                error!(msg_type = ?msg.type_id(), error = %e, "marshal message failed");
                return;
            }
        };
        if let Err(e) = self.conn.write_msg(&parts) {
            error!(msg_type = ?msg.type_id(), error = %e, "write message failed");
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    /// Flush queued messages, then disconnect.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Disconnect now, dropping queued messages.
    pub fn destroy(&self) {
        self.conn.destroy();
    }

    pub fn user_data(&self) -> Option<Payload> {
        self.user_data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_user_data(&self, data: Option<Payload>) {
        *self
            .user_data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = data;
    }
}

#[async_trait]
impl Agent for GateAgent {
    async fn run(&self) {
        let Some(ctx) = self.as_payload() else {
            return;
        };
        loop {
            let data = match self.conn.read_msg().await {
                Ok(data) => data,
                Err(e) => {
                    debug!(peer = %self.remote_addr(), error = %e, "read message error");
                    break;
                }
            };
            if data.is_empty() {
                continue;
            }
            let Some(processor) = &self.shared.processor else {
                continue;
            };

            let msg = match processor.unmarshal(data) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(peer = %self.remote_addr(), error = %e, "unmarshal message error");
                    break;
                }
            };
            if let Err(e) = processor.route(msg, ctx.clone()) {
                debug!(peer = %self.remote_addr(), error = %e, "route message error");
                break;
            }
        }
    }

    async fn on_close(&self) {
        let (Some(rpc), Some(agent)) = (&self.shared.agent_rpc, self.as_payload()) else {
            return;
        };
        if let Err(e) = rpc.call0(AGENT_BEFORE_CLOSE_EVENT, vec![agent]) {
            warn!(error = %e, "agent close event failed");
        }
    }
}
