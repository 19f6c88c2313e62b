//! Connection registry — the in-memory table of supervised connections.
//!
//! Pure data plus accessors. All state transitions are driven by the
//! supervisor; the registry only guarantees one record per id.

use std::collections::HashMap;

use super::types::{Connection, ConnectionStatus, ServerConfig, ServerStatusInfo};

/// Connection records keyed by server id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `connecting` record for `config`, replacing any existing
    /// record with the same id while keeping its reconnect bookkeeping.
    pub fn upsert_connecting(&mut self, config: &ServerConfig) -> &mut Connection {
        let conn = self
            .connections
            .entry(config.id.clone())
            .or_insert_with(|| Connection::new(config.clone()));
        conn.config = config.clone();
        conn.status = ConnectionStatus::Connecting;
        conn
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// All ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of connections currently in `connected`, sorted.
    pub fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Status snapshot of every record, sorted by id.
    pub fn statuses(&self) -> Vec<ServerStatusInfo> {
        let mut statuses: Vec<ServerStatusInfo> =
            self.connections.values().map(ServerStatusInfo::from).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
