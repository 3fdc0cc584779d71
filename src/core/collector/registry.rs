//! Live peer connections, in accept order

use crate::core::directory::NodeRecord;
use std::collections::BTreeMap;

/// Connection identifier, increasing in accept order
pub type ConnectionId = u64;

/// Something that may be bound to a node
pub trait Routable {
    /// Node the connection has resolved to, if any
    fn node(&self) -> Option<&NodeRecord>;
}

/// Outcome of routing a command to a node
#[derive(Debug)]
pub enum Route<'a, C> {
    /// Connection bound to the node
    Found(&'a mut C),
    /// No live connection reports for the node
    NotFound,
}

/// Registry of live connections
#[derive(Debug)]
pub struct Registry<C> {
    next_id: ConnectionId,
    connections: BTreeMap<ConnectionId, C>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            next_id: 1,
            connections: BTreeMap::new(),
        }
    }
}

impl<C> Registry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for the next connection
    pub fn next_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a connection
    pub fn insert(&mut self, id: ConnectionId, connection: C) {
        self.connections.insert(id, connection);
    }

    /// Get a connection
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut C> {
        self.connections.get_mut(&id)
    }

    /// Deregister a connection, handing it back for closing
    pub fn remove(&mut self, id: ConnectionId) -> Option<C> {
        self.connections.remove(&id)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl<C: Routable> Registry<C> {
    /// Find the connection reporting for a node; the earliest accepted wins
    pub fn route(&mut self, exercise_id: u64, node_id: u64) -> Route<'_, C> {
        self.connections
            .values_mut()
            .find(|connection| {
                connection
                    .node()
                    .is_some_and(|node| node.exercise_id == exercise_id && node.id == node_id)
            })
            .map_or(Route::NotFound, Route::Found)
    }
}
