//! Admission-controlled set of live connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transport::conn::ConnCore;
use crate::utils::metrics::global_metrics;

/// Gives the registry access to a connection's write pump
pub(crate) trait CoreHandle {
    fn core(&self) -> &Arc<ConnCore>;
}

/// Why a connection was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// The owning server or client is shutting down
    Closed,
    /// `max_conn_num` connections are already registered
    Full,
}

struct Slots {
    next_id: u64,
    conns: HashMap<u64, Arc<ConnCore>>,
}

pub(crate) struct ConnRegistry {
    slots: Mutex<Option<Slots>>,
    max_conn_num: usize,
}

impl ConnRegistry {
    pub(crate) fn new(max_conn_num: usize) -> Self {
        Self {
            slots: Mutex::new(Some(Slots {
                next_id: 0,
                conns: HashMap::new(),
            })),
            max_conn_num,
        }
    }

    /// Unbounded registry, as used by clients
    pub(crate) fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Slots>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check the limit and register the connection built by `build` in one step.
    ///
    /// `build` only runs when the connection is admitted; on rejection its
    /// captured socket is dropped unused.
    pub(crate) fn admit<C, F>(&self, build: F) -> Result<(u64, Arc<C>), Rejected>
    where
        C: CoreHandle,
        F: FnOnce() -> Arc<C>,
    {
        let mut guard = self.lock();
        let Some(slots) = guard.as_mut() else {
            return Err(Rejected::Closed);
        };
        if slots.conns.len() >= self.max_conn_num {
            global_metrics().connection_rejected();
            return Err(Rejected::Full);
        }

        let conn = build();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.conns.insert(id, conn.core().clone());
        global_metrics().connection_opened();
        Ok((id, conn))
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Some(slots) = self.lock().as_mut() {
            if slots.conns.remove(&id).is_some() {
                global_metrics().connection_closed();
            }
        }
    }

    /// Refuse further admissions and stop every registered connection.
    pub(crate) fn close_all(&self) {
        let taken = self.lock().take();
        if let Some(slots) = taken {
            for core in slots.conns.into_values() {
                core.shutdown();
                global_metrics().connection_closed();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, |slots| slots.conns.len())
    }
}
