//! Node directory
//!
//! Resolves the identifiers nodes announce to the node records of an exercise,
//! and looks up the console a node exposes on the simulator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Role of a node in its exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Student-operated router or host
    Work,
    /// Reports routing and traffic state
    Monitor,
    /// Routing registry, answers queries and updates
    Irr,
}

impl NodeKind {
    /// Whether the relay may open a console session to this kind of node
    pub fn has_console(&self) -> bool {
        matches!(self, NodeKind::Work | NodeKind::Irr)
    }
}

/// A node known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id, unique across exercises
    pub id: u64,
    /// Exercise the node belongs to
    pub exercise_id: u64,
    /// Identifier the node announces, lower-cased
    pub uuid: String,
    /// Display name
    pub name: String,
    /// Node role
    pub kind: NodeKind,
}

/// Console endpoint of a node on the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleInfo {
    /// Console transport, e.g. `telnet` or `vnc`
    #[serde(rename = "type")]
    pub console_type: String,
    /// Host the console listens on
    pub host: String,
    /// Console port
    pub port: u16,
}

impl ConsoleInfo {
    /// Create a telnet console description
    pub fn telnet(host: &str, port: u16) -> Self {
        Self {
            console_type: "telnet".to_string(),
            host: host.to_string(),
            port,
        }
    }

    /// Whether the relay can speak to this console
    pub fn is_telnet(&self) -> bool {
        self.console_type.eq_ignore_ascii_case("telnet")
    }

    /// Address to dial; wildcard listen addresses map to loopback
    pub fn dial_host(&self) -> &str {
        match self.host.as_str() {
            "::" => "::1",
            "0.0.0.0" => "127.0.0.1",
            host => host,
        }
    }
}

/// Directory errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Backend not reachable
    #[error("Node directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup interface to the node directory
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Find the node that announced `uuid` (already lower-cased)
    async fn resolve_uuid(&self, uuid: &str) -> Result<Option<NodeRecord>, DirectoryError>;

    /// Find a node by exercise and node id
    async fn find_node(
        &self,
        exercise_id: u64,
        node_id: u64,
    ) -> Result<Option<NodeRecord>, DirectoryError>;

    /// Console endpoint of a node, `None` if it has none
    async fn console_info(&self, node: &NodeRecord) -> Result<Option<ConsoleInfo>, DirectoryError>;
}

/// Directory entry as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node id
    pub id: u64,
    /// Exercise id
    pub exercise: u64,
    /// Announced identifier
    pub uuid: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Node role
    pub kind: NodeKind,
    /// Console endpoint
    #[serde(default)]
    pub console: Option<ConsoleInfo>,
}

impl NodeEntry {
    /// Directory record for this entry
    pub fn record(&self) -> NodeRecord {
        NodeRecord {
            id: self.id,
            exercise_id: self.exercise,
            uuid: self.uuid.trim().to_lowercase(),
            name: if self.name.is_empty() {
                format!("node-{}", self.id)
            } else {
                self.name.clone()
            },
            kind: self.kind,
        }
    }
}

/// Fixed directory built from configuration entries
#[derive(Debug, Default)]
pub struct StaticDirectory {
    by_uuid: HashMap<String, NodeRecord>,
    by_id: HashMap<(u64, u64), NodeRecord>,
    consoles: HashMap<u64, ConsoleInfo>,
}

impl StaticDirectory {
    /// Build a directory from entries; later entries win on duplicate keys
    pub fn new(entries: &[NodeEntry]) -> Self {
        let mut directory = Self::default();
        for entry in entries {
            let record = entry.record();
            if let Some(console) = &entry.console {
                directory.consoles.insert(record.id, console.clone());
            }
            directory
                .by_id
                .insert((record.exercise_id, record.id), record.clone());
            directory.by_uuid.insert(record.uuid.clone(), record);
        }
        directory
    }

    /// Number of known nodes
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl NodeDirectory for StaticDirectory {
    async fn resolve_uuid(&self, uuid: &str) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.by_uuid.get(uuid).cloned())
    }

    async fn find_node(
        &self,
        exercise_id: u64,
        node_id: u64,
    ) -> Result<Option<NodeRecord>, DirectoryError> {
        Ok(self.by_id.get(&(exercise_id, node_id)).cloned())
    }

    async fn console_info(&self, node: &NodeRecord) -> Result<Option<ConsoleInfo>, DirectoryError> {
        Ok(self.consoles.get(&node.id).cloned())
    }
}
