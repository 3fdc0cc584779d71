//! Event bus bridge
//!
//! The daemons publish events and receive commands on one topic per exercise,
//! `server:<exercise>/events`. Publishing is fire-and-forget; a pattern
//! subscription yields frames for the life of the process.
//!
//! [`LocalBus`] connects daemons inside one process, [`RedisBus`] connects
//! separate processes through a Redis server.

mod local;
pub mod message;
mod remote;

pub use local::LocalBus;
pub use remote::RedisBus;
pub use message::{decode_inbound, BusMessage, Command, Inbound, MalformedMessage, NOT_AVAILABLE};

use async_trait::async_trait;
use futures::stream::BoxStream;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Pattern matching every exercise topic
pub const EVENTS_PATTERN: &str = "server:*/events";

/// Topic of an exercise
pub fn events_topic(exercise_id: u64) -> String {
    format!("server:{}/events", exercise_id)
}

/// Extract the exercise id from a topic name
pub fn parse_events_topic(topic: &str) -> Option<u64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^server:(\d+)/events$").expect("topic pattern is valid"));

    pattern.captures(topic)?[1].parse().ok()
}

/// One frame received from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusFrame {
    /// Subscription confirmed
    Subscribed {
        /// Pattern subscribed to
        pattern: String,
    },
    /// A published message
    Message {
        /// Pattern that matched
        pattern: String,
        /// Topic it was published on
        topic: String,
        /// JSON payload
        payload: String,
    },
    /// The subscriber fell behind and missed messages
    Lagged(u64),
}

/// Frames of a pattern subscription
pub type Subscription = BoxStream<'static, BusFrame>;

/// Bus errors
#[derive(Error, Debug)]
pub enum BusError {
    /// Message could not be serialised
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Pattern could not be compiled
    #[error("Invalid subscription pattern {pattern}: {reason}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Failure description
        reason: String,
    },

    /// Transport to the bus failed
    #[error("Bus transport error: {0}")]
    Transport(String),
}

/// Publish/subscribe transport
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a raw payload on a topic; no delivery confirmation
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    /// Subscribe to every topic matching a glob pattern (`*` wildcard).
    /// Fails when the bus cannot be reached.
    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, BusError>;
}

/// Compile a glob pattern into an anchored regex
pub fn glob_pattern(pattern: &str) -> Result<Regex, BusError> {
    let source = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    Regex::new(&source).map_err(|e| BusError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
