//! Client registry
//!
//! The one piece of state shared between connections: identity -> outbound
//! sink. The lock guards only the map; fan-out works on a [`Snapshot`] taken
//! under the lock and iterated after it is released.

use log::debug;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::client::ClientSink;
use crate::error::RegistryError;
use crate::protocol::ConnectionId;

/// Registry of connections eligible to receive broadcasts
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<ConnectionId, ClientSink>>,
}

/// Point-in-time copy of the registry contents
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(ConnectionId, ClientSink)>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &(ConnectionId, ClientSink)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`.
    ///
    /// Fails if the sink's writer has already stopped.
    pub async fn add(&self, id: ConnectionId, sink: ClientSink) -> Result<(), RegistryError> {
        if sink.is_closed() {
            return Err(RegistryError::SinkClosed(id));
        }
        let mut entries = self.entries.lock().await;
        entries.insert(id, sink);
        debug!("Registered {} ({} connections)", id, entries.len());
        Ok(())
    }

    /// Like [`Registry::add`], but refuses a new identity once `limit` entries exist.
    ///
    /// The capacity check and the insert happen under the same lock.
    pub async fn admit(
        &self,
        id: ConnectionId,
        sink: ClientSink,
        limit: usize,
    ) -> Result<usize, RegistryError> {
        if sink.is_closed() {
            return Err(RegistryError::SinkClosed(id));
        }
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&id) && entries.len() >= limit {
            return Err(RegistryError::Full { limit });
        }
        entries.insert(id, sink);
        Ok(entries.len())
    }

    /// Remove the entry for `id`. Removing an absent identity is a no-op.
    ///
    /// Returns whether an entry was present.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let mut entries = self.entries.lock().await;
        let removed = entries.remove(&id).is_some();
        if removed {
            debug!("Deregistered {} ({} connections)", id, entries.len());
        }
        removed
    }

    /// Copy all entries. The lock is released before this returns.
    pub async fn snapshot(&self) -> Snapshot {
        let entries = self.entries.lock().await;
        Snapshot {
            entries: entries
                .iter()
                .map(|(id, sink)| (*id, sink.clone()))
                .collect(),
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.entries.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
