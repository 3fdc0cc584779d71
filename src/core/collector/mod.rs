//! State collector daemon
//!
//! Accepts connections from exercise nodes, asks each for its identity and
//! turns the sections it reports into stored state and bus events. Registry
//! commands arriving on the bus are written to the connection of the target
//! node.
//!
//! Everything runs in one task: a single `select!` waits on the listener, the
//! bus subscription and the read streams of all connections. Writes to peers
//! are queued per connection and never awaited by the loop.

mod connection;
mod registry;

pub use connection::{Dispatch, PeerConnection, PeerState};
pub use registry::{ConnectionId, Registry, Routable, Route};

use super::bus::{decode_inbound, parse_events_topic, BusFrame, BusMessage, Command, Inbound, EVENTS_PATTERN, NOT_AVAILABLE};
use super::directory::NodeKind;
use super::error::DaemonError;
use super::mux::{self, ReadEvent, ReadStreams};
use super::outbox::DEFAULT_OUTBOUND_QUEUE;
use super::protocol::{Directive, Line, SectionCodec, DEFAULT_MAX_LINE_LENGTH};
use super::services::Services;
use super::transport::socket_address;
use futures::stream::{SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::codec::FramedRead;

/// Collector settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Listen address
    pub address: String,
    /// Listen port
    pub port: u16,
    /// Accept backlog
    pub backlog: u32,
    /// Longest accepted protocol line in bytes
    pub max_line_length: usize,
    /// Writes that may be pending toward one peer before it is dropped
    pub outbound_queue: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 6000,
            backlog: 128,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

type Peers = Registry<PeerConnection>;

/// The state collector
pub struct Collector {
    config: CollectorConfig,
    services: Services,
    pattern: String,
}

impl Collector {
    /// Create a collector subscribing to all exercise topics
    pub fn new(config: CollectorConfig, services: Services) -> Self {
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

    /// Open the listening socket
    pub fn bind(&self) -> Result<TcpListener, DaemonError> {
        let addr = socket_address(&self.config.address, self.config.port);
        let parsed: SocketAddr = addr
            .parse()
            .map_err(|_| DaemonError::InvalidAddress(addr.clone()))?;
        let bind_error = |source: std::io::Error| DaemonError::Bind {
            addr: addr.clone(),
            source,
        };

        let socket = if parsed.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(parsed).map_err(bind_error)?;
        socket.listen(self.config.backlog).map_err(bind_error)
    }

    /// Bind and serve
    pub async fn run(self) -> Result<(), DaemonError> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serve connections and bus commands. Only returns on setup failure.
    pub async fn serve(self, listener: TcpListener) -> Result<(), DaemonError> {
        let mut subscription = self.services.bus.psubscribe(&self.pattern).await?;
        let mut peers = Peers::new();
        let mut reads: ReadStreams<ConnectionId, Line> = SelectAll::new();
        let mut bus_open = true;

        tracing::info!(
            "Listening for state updates on {}:{}",
            self.config.address,
            self.config.port
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr, &mut peers, &mut reads),
                    Err(e) => tracing::warn!(error = %e, "Failed to accept state connection"),
                },
                frame = subscription.next(), if bus_open => match frame {
                    Some(frame) => self.handle_frame(frame, &mut peers).await,
                    None => {
                        tracing::warn!(pattern = %self.pattern, "Bus subscription ended");
                        bus_open = false;
                    }
                },
                Some((id, event)) = reads.next(), if !reads.is_empty() => {
                    self.handle_read(id, event, &mut peers).await;
                }
            }
        }
    }

    fn accept(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        peers: &mut Peers,
        reads: &mut ReadStreams<ConnectionId, Line>,
    ) {
        tracing::info!(peer = %addr, "Incoming state connection from {}", addr);

        let (read_half, write_half) = stream.into_split();
        let id = peers.next_id();
        let codec = SectionCodec::with_max_line_length(self.config.max_line_length);
        let (lines, handle) = mux::watch(id, FramedRead::new(read_half, codec));
        reads.push(lines);

        let mut peer = PeerConnection::new(id, addr, write_half, self.config.outbound_queue, handle);
        if let Err(e) = peer.send(Directive::RequestIdentity) {
            tracing::warn!(peer = %addr, error = %e, "Failed to request identity");
            peer.close();
            return;
        }
        peers.insert(id, peer);
    }

    async fn handle_read(&self, id: ConnectionId, event: ReadEvent<Line>, peers: &mut Peers) {
        match event {
            ReadEvent::Data(line) => {
                let Some(peer) = peers.get_mut(id) else {
                    return;
                };
                if let Some(dispatch) = peer.state_mut().handle_line(line, &self.services).await {
                    tracing::trace!(peer = %peer.addr(), ?dispatch, "Section dispatched");
                }
            }
            ReadEvent::Failed(e) => {
                tracing::warn!(connection = id, error = %e, "State connection read failed");
                disconnect(id, peers);
            }
            ReadEvent::Closed => disconnect(id, peers),
        }
    }

    async fn handle_frame(&self, frame: BusFrame, peers: &mut Peers) {
        let (topic, payload) = match frame {
            BusFrame::Message { topic, payload, .. } => (topic, payload),
            BusFrame::Subscribed { pattern } => {
                tracing::debug!(%pattern, "Subscribed to bus");
                return;
            }
            BusFrame::Lagged(missed) => {
                tracing::warn!(missed, "Bus subscription lagged, messages dropped");
                return;
            }
        };

        let Some(exercise_id) = parse_events_topic(&topic) else {
            tracing::warn!(%topic, "Malformed channel name: {}", topic);
            return;
        };

        let command = match decode_inbound(&payload) {
            Ok(Inbound::Command(command)) => command,
            Ok(Inbound::Ignored(_)) => return,
            Err(e) => {
                tracing::warn!(exercise = exercise_id, error = %e, "Malformed message: {}", payload);
                return;
            }
        };

        let directive = match &command {
            Command::IrrQuery { query, .. } => Directive::Query(query.clone()),
            Command::IrrUpdate { update, .. } => Directive::Update(update.clone()),
            // Not for us
            Command::TerminalInput { .. } => return,
        };

        self.route(exercise_id, &command, directive, peers).await;
    }

    async fn route(&self, exercise_id: u64, command: &Command, directive: Directive, peers: &mut Peers) {
        let node_id = command.node_id();

        let failed = match peers.route(exercise_id, node_id) {
            Route::Found(peer) => {
                if peer.node().map(|node| node.kind) != Some(NodeKind::Irr) {
                    tracing::debug!(exercise = exercise_id, node = node_id, "Ignoring {} for non-registry node", command.type_name());
                    return;
                }
                match peer.send(directive) {
                    Ok(()) => {
                        tracing::debug!(exercise = exercise_id, node = node_id, "Forwarded {}", command.type_name());
                        None
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer.addr(), error = %e, "Failed to forward {}", command.type_name());
                        Some(peer.id())
                    }
                }
            }
            Route::NotFound => {
                tracing::warn!(
                    exercise = exercise_id,
                    node = node_id,
                    "No existing connection found for exercise {} node {}",
                    exercise_id,
                    node_id
                );
                if let Some(response) = BusMessage::response_to(command, NOT_AVAILABLE) {
                    self.services.publish(exercise_id, &response).await;
                }
                None
            }
        };

        if let Some(id) = failed {
            disconnect(id, peers);
        }
    }
}

fn disconnect(id: ConnectionId, peers: &mut Peers) {
    if let Some(peer) = peers.remove(id) {
        tracing::info!(peer = %peer.addr(), "Lost state connection from {}", peer.addr());
        peer.close();
    }
}
