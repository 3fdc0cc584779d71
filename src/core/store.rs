//! State store
//!
//! Keeps the latest content reported per (node, goal). Writing identical
//! content is a no-op: the record and its timestamp stay as they were.

use super::protocol::GoalType;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Latest state of one goal on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// Node id
    pub node_id: u64,
    /// Goal type
    pub goal: GoalType,
    /// Reported content
    pub content: String,
    /// Time of the last content change
    pub last_update: DateTime<Utc>,
}

/// Result of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    /// Record after the write
    pub record: StateRecord,
    /// Whether the content was created or changed
    pub changed: bool,
}

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend not reachable
    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

/// Durable per-goal state storage
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create or update the record for (node, goal).
    ///
    /// The read, compare and write happen under one row lock so concurrent
    /// writers to the same key serialise.
    async fn upsert(&self, node_id: u64, goal: GoalType, content: &str) -> Result<Upsert, StoreError>;

    /// Current record for (node, goal)
    async fn get(&self, node_id: u64, goal: GoalType) -> Result<Option<StateRecord>, StoreError>;
}

/// Store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records created
    pub inserts: u64,
    /// Records whose content changed
    pub updates: u64,
    /// Writes that reproduced existing content
    pub unchanged: u64,
}

impl StoreStats {
    /// Writes that touched a record
    pub fn writes(&self) -> u64 {
        self.inserts + self.updates
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<(u64, GoalType), StateRecord>>,
    stats: Mutex<StoreStats>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        *self.stats.lock()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Timestamps of one record never repeat or go backwards
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert(&self, node_id: u64, goal: GoalType, content: &str) -> Result<Upsert, StoreError> {
        // The map lock is the row lock
        let mut records = self.records.lock();
        let mut stats = self.stats.lock();

        let upsert = match records.get_mut(&(node_id, goal)) {
            Some(record) if record.content == content => {
                stats.unchanged += 1;
                Upsert {
                    record: record.clone(),
                    changed: false,
                }
            }
            Some(record) => {
                record.content = content.to_string();
                record.last_update = next_timestamp(Some(record.last_update));
                stats.updates += 1;
                Upsert {
                    record: record.clone(),
                    changed: true,
                }
            }
            None => {
                let record = StateRecord {
                    node_id,
                    goal,
                    content: content.to_string(),
                    last_update: next_timestamp(None),
                };
                records.insert((node_id, goal), record.clone());
                stats.inserts += 1;
                Upsert {
                    record,
                    changed: true,
                }
            }
        };

        Ok(upsert)
    }

    async fn get(&self, node_id: u64, goal: GoalType) -> Result<Option<StateRecord>, StoreError> {
        Ok(self.records.lock().get(&(node_id, goal)).cloned())
    }
}
