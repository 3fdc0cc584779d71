//! Bus message shapes
//!
//! Every payload is a JSON object tagged by `type`. Outbound events are
//! produced from [`BusMessage`]; inbound commands are validated by hand with
//! [`decode_inbound`] so that a missing field is reported, not guessed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Response sent when a command targets a node with no live connection
pub const NOT_AVAILABLE: &str = "Server is not yet available";

/// Messages carried on exercise topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusMessage {
    /// Reported state of a goal
    State {
        /// Canonical goal name
        goal_type: String,
        /// Node id
        node: u64,
        /// Reported content
        content: String,
        /// Last content change
        ts: DateTime<Utc>,
    },
    /// Answer to a registry query
    IrrQueryResponse {
        /// Node id
        node: u64,
        /// Originating request type
        request: String,
        /// Response text
        response: String,
    },
    /// Answer to a registry update
    IrrUpdateResponse {
        /// Node id
        node: u64,
        /// Originating request type
        request: String,
        /// Response text
        response: String,
    },
    /// Registry query
    IrrQuery {
        /// Target node
        node_id: u64,
        /// Query text
        query: String,
    },
    /// Registry update
    IrrUpdate {
        /// Target node
        node_id: u64,
        /// Update text
        update: String,
    },
    /// Keystrokes for a console
    TerminalInput {
        /// Target node
        node_id: u64,
        /// Raw text
        data: String,
    },
    /// Console output
    TerminalOutput {
        /// Source node
        node_id: u64,
        /// Base64 encoded bytes
        data: String,
    },
    /// Something the requester should know about
    Warning {
        /// Node concerned
        node_id: u64,
        /// Human readable text
        message: String,
    },
}

impl BusMessage {
    /// Response to a registry command, carrying `response` as the answer
    pub fn response_to(command: &Command, response: &str) -> Option<Self> {
        match command {
            Command::IrrQuery { node_id, .. } => Some(BusMessage::IrrQueryResponse {
                node: *node_id,
                request: command.type_name().to_string(),
                response: response.to_string(),
            }),
            Command::IrrUpdate { node_id, .. } => Some(BusMessage::IrrUpdateResponse {
                node: *node_id,
                request: command.type_name().to_string(),
                response: response.to_string(),
            }),
            Command::TerminalInput { .. } => None,
        }
    }
}

/// Commands the daemons act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forward a query to a registry node
    IrrQuery {
        /// Target node
        node_id: u64,
        /// Query text
        query: String,
    },
    /// Forward an update to a registry node
    IrrUpdate {
        /// Target node
        node_id: u64,
        /// Update text
        update: String,
    },
    /// Write to a node console
    TerminalInput {
        /// Target node
        node_id: u64,
        /// Raw text
        data: String,
    },
}

impl Command {
    /// Target node
    pub fn node_id(&self) -> u64 {
        match self {
            Command::IrrQuery { node_id, .. }
            | Command::IrrUpdate { node_id, .. }
            | Command::TerminalInput { node_id, .. } => *node_id,
        }
    }

    /// Wire `type` of the command
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::IrrQuery { .. } => "irr-query",
            Command::IrrUpdate { .. } => "irr-update",
            Command::TerminalInput { .. } => "terminal-input",
        }
    }
}

/// Outcome of decoding an inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A command for one of the daemons
    Command(Command),
    /// A well-formed message no daemon acts on, e.g. our own events
    Ignored(String),
}

/// Rejected inbound payload
#[derive(Error, Debug)]
pub enum MalformedMessage {
    /// Not JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Not an object with a string `type`
    #[error("Missing message type")]
    MissingType,

    /// `node_id` absent or not an integer
    #[error("Missing or invalid node_id in {0} message")]
    MissingNodeId(String),

    /// Payload field absent or not a string
    #[error("Missing field {field} in {kind} message")]
    MissingField {
        /// Message type
        kind: String,
        /// Field name
        field: &'static str,
    },
}

/// `node_id` may arrive as a number or a numeric string
fn node_id_of(value: &Value) -> Option<u64> {
    match value.get("node_id")? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn text_field(value: &Value, kind: &str, field: &'static str) -> Result<String, MalformedMessage> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MalformedMessage::MissingField {
            kind: kind.to_string(),
            field,
        })
}

/// Validate and decode an inbound payload
pub fn decode_inbound(payload: &str) -> Result<Inbound, MalformedMessage> {
    let value: Value = serde_json::from_str(payload)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(MalformedMessage::MissingType)?;

    if !matches!(kind, "irr-query" | "irr-update" | "terminal-input") {
        return Ok(Inbound::Ignored(kind.to_string()));
    }

    let node_id = node_id_of(&value).ok_or_else(|| MalformedMessage::MissingNodeId(kind.to_string()))?;

    let command = match kind {
        "irr-query" => Command::IrrQuery {
            node_id,
            query: text_field(&value, kind, "query")?,
        },
        "irr-update" => Command::IrrUpdate {
            node_id,
            update: text_field(&value, kind, "update")?,
        },
        _ => Command::TerminalInput {
            node_id,
            data: text_field(&value, kind, "data")?,
        },
    };

    Ok(Inbound::Command(command))
}
