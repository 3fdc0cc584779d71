//! Telnet relay daemon
//!
//! Bridges the web terminal to node consoles. `terminal-input` commands from
//! the bus are written to a Telnet session toward the node, opened on first
//! use; whatever the console sends back is published as base64
//! `terminal-output`. Nodes that cannot be served are remembered and never
//! looked up again.

mod registry;

pub use registry::{Lookup, SessionKey, SessionRegistry};

use super::bus::{decode_inbound, parse_events_topic, BusFrame, BusMessage, Command, Inbound, EVENTS_PATTERN};
use super::error::DaemonError;
use super::mux::{self, ReadEvent, ReadStreams};
use super::outbox::DEFAULT_OUTBOUND_QUEUE;
use super::services::Services;
use super::transport::{self, TelnetSession};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::BytesMut;
use futures::stream::{SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::codec::{BytesCodec, FramedRead};

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Console connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Initial read buffer per session in bytes
    pub read_buffer: usize,
    /// Writes that may be pending toward one console before it is dropped
    pub outbound_queue: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 500,
            read_buffer: 4096,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl RelayConfig {
    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Read streams are tagged with the session serial so a stale stream cannot
/// evict a newer session to the same node
type Tag = (SessionKey, u64);

type Sessions = SessionRegistry<TelnetSession>;
type Reads = ReadStreams<Tag, BytesMut>;

/// The Telnet relay
pub struct Relay {
    config: RelayConfig,
    services: Services,
    pattern: String,
}

impl Relay {
    /// Create a relay subscribing to all exercise topics
    pub fn new(config: RelayConfig, services: Services) -> Self {
        Self {
            config,
            services,
            pattern: EVENTS_PATTERN.to_string(),
        }
    }

    /// Subscribe to a different topic pattern
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = pattern.to_string();
        self
    }

    /// Relay until the subscription has ended and every session has closed
    pub async fn run(self) -> Result<(), DaemonError> {
        tracing::info!("Starting telnet relay");

        let mut subscription = self.services.bus.psubscribe(&self.pattern).await?;
        let mut sessions = Sessions::new();
        let mut reads = Reads::new();
        let mut bus_open = true;

        loop {
            if !bus_open && reads.is_empty() {
                tracing::info!("Telnet relay stopped");
                return Ok(());
            }

            tokio::select! {
                frame = subscription.next(), if bus_open => match frame {
                    Some(frame) => self.handle_frame(frame, &mut sessions, &mut reads).await,
                    None => {
                        tracing::warn!(pattern = %self.pattern, "Bus subscription ended");
                        bus_open = false;
                    }
                },
                Some((tag, event)) = reads.next(), if !reads.is_empty() => {
                    self.handle_read(tag, event, &mut sessions).await;
                }
            }
        }
    }

    async fn handle_frame(&self, frame: BusFrame, sessions: &mut Sessions, reads: &mut Reads) {
        let BusFrame::Message { topic, payload, .. } = frame else {
            return;
        };

        let Some(exercise_id) = parse_events_topic(&topic) else {
            tracing::warn!(%topic, "Malformed channel name: {}", topic);
            return;
        };

        match decode_inbound(&payload) {
            Ok(Inbound::Command(Command::TerminalInput { node_id, data })) => {
                self.terminal_input((exercise_id, node_id), data.as_bytes(), sessions, reads)
                    .await;
            }
            // Not for us
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(exercise = exercise_id, error = %e, "Malformed terminal input: {}", payload);
            }
        }
    }

    async fn terminal_input(&self, key: SessionKey, data: &[u8], sessions: &mut Sessions, reads: &mut Reads) {
        match sessions.lookup(key) {
            Lookup::Live(_) => {}
            Lookup::Unavailable => {
                tracing::trace!(exercise = key.0, node = key.1, "Dropping input for unavailable console");
                return;
            }
            Lookup::Missing => {
                if !self.open(key, sessions, reads).await {
                    return;
                }
            }
        }

        let Lookup::Live(session) = sessions.lookup(key) else {
            return;
        };

        if let Err(e) = session.write(data) {
            tracing::warn!(
                exercise = key.0,
                node = key.1,
                error = %e,
                "Telnet connection to {} {} dropped",
                session.host(),
                session.port()
            );
            if let Some(session) = sessions.evict(key) {
                session.close();
            }
        }
    }

    /// Look the node up and dial its console. Returns whether a session is open.
    async fn open(&self, key: SessionKey, sessions: &mut Sessions, reads: &mut Reads) -> bool {
        let (exercise_id, node_id) = key;
        let directory = &self.services.directory;

        let node = match directory.find_node(exercise_id, node_id).await {
            Ok(Some(node)) if node.kind.has_console() => node,
            Ok(Some(node)) => {
                tracing::warn!(exercise = exercise_id, node = node_id, kind = ?node.kind, "Node has no console to relay");
                sessions.mark_unavailable(key);
                self.warn(key, "This node has no terminal").await;
                return false;
            }
            Ok(None) => {
                tracing::warn!(
                    exercise = exercise_id,
                    node = node_id,
                    "Invalid node-id {} provided for exercise {}",
                    node_id,
                    exercise_id
                );
                self.warn(key, "Unknown node").await;
                return false;
            }
            Err(e) => {
                tracing::warn!(exercise = exercise_id, node = node_id, error = %e, "Node lookup failed");
                return false;
            }
        };

        let console = match directory.console_info(&node).await {
            Ok(Some(console)) if console.is_telnet() => console,
            Ok(other) => {
                let kind = other.map_or_else(|| "none".to_string(), |console| console.console_type);
                tracing::info!(exercise = exercise_id, node = node_id, console = %kind, "Console is not telnet, ignoring node");
                sessions.mark_unavailable(key);
                self.warn(key, "Only telnet consoles can be relayed").await;
                return false;
            }
            Err(e) => {
                tracing::warn!(exercise = exercise_id, node = node_id, error = %e, "Console lookup failed");
                return false;
            }
        };

        let host = console.dial_host();
        let stream = match transport::connect(host, console.port, self.config.connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) if e.is_refused() => {
                tracing::warn!(exercise = exercise_id, node = node_id, "Connection refused by {} {}", host, console.port);
                sessions.mark_unavailable(key);
                self.warn(key, "Console refused the connection").await;
                return false;
            }
            Err(e) => {
                tracing::warn!(exercise = exercise_id, node = node_id, error = %e, "Telnet connection failed");
                self.warn(key, "Console is not reachable").await;
                return false;
            }
        };

        tracing::info!(exercise = exercise_id, node = node_id, "Telnet connection to {} {} established", host, console.port);

        let serial = sessions.next_serial();
        let (read_half, write_half) = stream.into_split();
        let frames = FramedRead::with_capacity(read_half, BytesCodec::new(), self.config.read_buffer);
        let (output, handle) = mux::watch((key, serial), frames);
        reads.push(output);
        let session = TelnetSession::new(host, console.port, serial, write_half, self.config.outbound_queue, handle);
        sessions.insert_live(key, session);

        true
    }

    async fn handle_read(&self, tag: Tag, event: ReadEvent<BytesMut>, sessions: &mut Sessions) {
        let (key, serial) = tag;

        match event {
            ReadEvent::Data(raw) => {
                let Lookup::Live(session) = sessions.lookup(key) else {
                    return;
                };
                if session.serial() != serial {
                    return;
                }

                match session.ingest(&raw) {
                    Ok(output) if output.is_empty() => {}
                    Ok(output) => {
                        let message = BusMessage::TerminalOutput {
                            node_id: key.1,
                            data: BASE64.encode(&output),
                        };
                        self.services.publish(key.0, &message).await;
                    }
                    Err(e) => {
                        tracing::warn!(exercise = key.0, node = key.1, error = %e, "Telnet negotiation failed");
                        close(key, serial, sessions);
                    }
                }
            }
            ReadEvent::Failed(e) => {
                tracing::warn!(exercise = key.0, node = key.1, error = %e, "Telnet read failed");
                close(key, serial, sessions);
            }
            ReadEvent::Closed => close(key, serial, sessions),
        }
    }

    async fn warn(&self, key: SessionKey, message: &str) {
        let warning = BusMessage::Warning {
            node_id: key.1,
            message: message.to_string(),
        };
        self.services.publish(key.0, &warning).await;
    }
}

/// Evict a session so the next input dials again
fn close(key: SessionKey, serial: u64, sessions: &mut Sessions) {
    if let Some(session) = sessions.evict_if(key, |session| session.serial() == serial) {
        tracing::warn!(
            exercise = key.0,
            node = key.1,
            "Telnet connection to {} {} closed",
            session.host(),
            session.port()
        );
        session.close();
    }
}
