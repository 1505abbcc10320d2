use super::{ConnectionHandle, ConnectionState};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Live authenticated connections of one server.
///
/// Inserted after a successful handshake and removed at teardown; readers
/// iterate over [`snapshot`](Self::snapshot) so no shard lock is held
/// while sending.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: ConnectionHandle) {
        self.connections.insert(conn.id(), conn);
    }

    pub fn remove(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: &Uuid) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    /// Point-in-time copy of every registered handle
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot restricted to ACTIVE connections
    pub fn active(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .filter(|entry| entry.value().state() == ConnectionState::Active)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
