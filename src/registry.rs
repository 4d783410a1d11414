//! Registry of live sender connections.
//!
//! Each connection owns its own window and timer inside its sender task;
//! the registry only maps a [`ConnectionId`] to the [`SenderHandle`] so
//! connections can be looked up, closed and cancelled from anywhere.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::channel::DatagramChannel;
use crate::config::GbnConfig;
use crate::error::ConfigError;
use crate::gbn_connection::{spawn_sender, SenderHandle};

/// Identifier assigned to a connection when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Thread-safe map of open connections.  Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, SenderHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, SenderHandle>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a sender over `channel` and register it under a fresh id.
    pub fn open<C>(
        &self,
        channel: C,
        config: GbnConfig,
    ) -> Result<(ConnectionId, SenderHandle), ConfigError>
    where
        C: DatagramChannel + 'static,
    {
        let handle = spawn_sender(channel, config)?;
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections().insert(id, handle.clone());
        log::debug!("[registry] opened {id}");
        Ok((id, handle))
    }

    pub fn get(&self, id: ConnectionId) -> Option<SenderHandle> {
        self.connections().get(&id).cloned()
    }

    /// Forget a connection without disturbing its task (normal close).
    pub fn remove(&self, id: ConnectionId) -> Option<SenderHandle> {
        let removed = self.connections().remove(&id);
        if removed.is_some() {
            log::debug!("[registry] closed {id}");
        }
        removed
    }

    /// Cancel a connection and forget it.  Returns `false` for unknown ids.
    pub fn cancel(&self, id: ConnectionId) -> bool {
        match self.connections().remove(&id) {
            Some(handle) => {
                handle.cancel();
                log::debug!("[registry] cancelled {id}");
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every connection.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.connections().drain().collect();
        for (id, handle) in drained {
            handle.cancel();
            log::debug!("[registry] cancelled {id}");
        }
    }

    /// Drop entries whose tasks have already stopped.
    pub fn prune(&self) -> usize {
        let mut connections = self.connections();
        let before = connections.len();
        connections.retain(|_, handle| !handle.is_closed());
        before - connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }
}
