//! Console sessions by node

use std::collections::HashMap;

/// (exercise id, node id)
pub type SessionKey = (u64, u64);

enum Slot<S> {
    Live(S),
    /// The node offers no console the relay can use
    Unavailable,
}

/// Result of looking up a node
#[derive(Debug)]
pub enum Lookup<'a, S> {
    /// An open session
    Live(&'a mut S),
    /// Known not to be servable
    Unavailable,
    /// Never seen, or the last session closed
    Missing,
}

/// Open sessions plus the negative cache
pub struct SessionRegistry<S> {
    slots: HashMap<SessionKey, Slot<S>>,
    next_serial: u64,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            next_serial: 1,
        }
    }
}

impl<S> SessionRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial number for the next session
    pub fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    /// Look up a node
    pub fn lookup(&mut self, key: SessionKey) -> Lookup<'_, S> {
        match self.slots.get_mut(&key) {
            Some(Slot::Live(session)) => Lookup::Live(session),
            Some(Slot::Unavailable) => Lookup::Unavailable,
            None => Lookup::Missing,
        }
    }

    /// Register an open session
    pub fn insert_live(&mut self, key: SessionKey, session: S) {
        self.slots.insert(key, Slot::Live(session));
    }

    /// Remember that a node cannot be served. Permanent for the life of the relay.
    pub fn mark_unavailable(&mut self, key: SessionKey) {
        self.slots.insert(key, Slot::Unavailable);
    }

    /// Remove the open session for a node if `accept` agrees
    pub fn evict_if(&mut self, key: SessionKey, accept: impl FnOnce(&S) -> bool) -> Option<S> {
        let hit = match self.slots.get(&key) {
            Some(Slot::Live(session)) => accept(session),
            _ => false,
        };
        if !hit {
            return None;
        }

        match self.slots.remove(&key) {
            Some(Slot::Live(session)) => Some(session),
            _ => None,
        }
    }

    /// Remove the open session for a node
    pub fn evict(&mut self, key: SessionKey) -> Option<S> {
        self.evict_if(key, |_| true)
    }

    /// Number of open sessions
    pub fn live_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Number of nodes in the negative cache
    pub fn unavailable_count(&self) -> usize {
        self.slots.len() - self.live_count()
    }
}
