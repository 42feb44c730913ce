//! Registry of registered connections.
//!
//! An entry exists exactly while its connection is `Registered` (or is being
//! torn down). Insertion and retirement flip the connection state while the
//! registry write lock is held, so readers never observe an entry whose
//! connection is still `Connecting`. Lock order is registry first, then
//! connection state.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_core::ConnectionId;
use parking_lot::RwLock;

use super::connection::ClientConnection;

/// A registered connection and the name bound to it.
#[derive(Clone, Debug)]
pub struct RegistryEntry {
    /// The live connection.
    pub connection: Arc<ClientConnection>,
    /// Display name from the handshake.
    pub name: Arc<str>,
}

/// Outcome of [`ConnectionRegistry::retire`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retirement {
    /// `true` for the single call that moved the connection to `Closed`.
    pub newly_closed: bool,
    /// Name of the entry that was removed, if one was present.
    pub name: Option<Arc<str>>,
}

/// Connections that completed the registration handshake.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, RegistryEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under `name`.
    ///
    /// Returns `false` (and leaves the registry untouched) unless the
    /// connection was still `Connecting`.
    pub fn insert(&self, connection: &Arc<ClientConnection>, name: Arc<str>) -> bool {
        let mut entries = self.entries.write();
        if !connection.mark_registered(Arc::clone(&name)) {
            return false;
        }
        let _ = entries.insert(
            connection.id,
            RegistryEntry {
                connection: Arc::clone(connection),
                name,
            },
        );
        true
    }

    /// Remove an entry without touching connection state. Removing an absent
    /// id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<RegistryEntry> {
        self.entries.write().remove(&id)
    }

    /// Remove the connection's entry (if any) and move it to `Closed`.
    pub fn retire(&self, connection: &ClientConnection) -> Retirement {
        let mut entries = self.entries.write();
        let removed = entries.remove(&connection.id);
        let newly_closed = connection.mark_closed();
        Retirement {
            newly_closed,
            name: removed.map(|entry| entry.name),
        }
    }

    /// Snapshot of every registered connection except `id`.
    ///
    /// The lock is released before the caller touches any connection.
    pub fn all_except(&self, id: ConnectionId) -> Vec<Arc<ClientConnection>> {
        self.entries
            .read()
            .iter()
            .filter(|(entry_id, _)| **entry_id != id)
            .map(|(_, entry)| Arc::clone(&entry.connection))
            .collect()
    }

    /// Display name bound to `id`.
    pub fn name_of(&self, id: ConnectionId) -> Option<Arc<str>> {
        self.entries.read().get(&id).map(|e| Arc::clone(&e.name))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered display names, sorted. Names are not unique.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .values()
            .map(|e| e.name.to_string())
            .collect();
        names.sort_unstable();
        names
    }
}
