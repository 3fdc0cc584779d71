//! Inbound state connection
//!
//! A [`PeerState`] turns decoded lines into sections and acts on each section
//! once it is complete. Sections are only acted on after the peer has announced
//! an identity that resolves to a node.

use super::registry::{ConnectionId, Routable};
use crate::core::bus::BusMessage;
use crate::core::directory::NodeRecord;
use crate::core::protocol::{Directive, GoalType, Line, Section, SectionCodec, SectionKind};
use crate::core::services::Services;
use crate::core::outbox::{Outbox, OutboxError};
use bytes::BytesMut;
use futures::stream::AbortHandle;
use std::net::SocketAddr;
use tokio::io::AsyncWrite;
use tokio_util::codec::Encoder;

/// Resolution of the announced identity
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    /// Not looked up yet, or the lookup failed
    Pending,
    /// Bound to a node
    Resolved(NodeRecord),
    /// The directory does not know the identity
    Unknown,
}

/// What a finalized section led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No identity yet, section dropped
    Ignored,
    /// Identity announced and resolved
    Identified(u64),
    /// Identity cannot be resolved, section dropped
    Unresolved(String),
    /// Goal state stored and published
    Stored {
        /// Goal reported
        goal: GoalType,
        /// Whether the stored content changed
        changed: bool,
    },
    /// Store rejected the write, nothing published
    StoreFailed(GoalType),
    /// Command result published
    Responded(SectionKind),
    /// Section name not understood
    Unknown(String),
}

/// Parser and identity state of one connection
#[derive(Debug)]
pub struct PeerState {
    open: Option<Section>,
    identity: Option<String>,
    resolution: Resolution,
}

impl Default for PeerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerState {
    /// Fresh connection state
    pub fn new() -> Self {
        Self {
            open: None,
            identity: None,
            resolution: Resolution::Pending,
        }
    }

    /// Announced identity, lower-cased
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Resolved node
    pub fn node(&self) -> Option<&NodeRecord> {
        match &self.resolution {
            Resolution::Resolved(node) => Some(node),
            _ => None,
        }
    }

    /// Name of the open section
    pub fn open_section(&self) -> Option<&SectionKind> {
        self.open.as_ref().map(|section| &section.kind)
    }

    /// Feed one decoded line. Returns the outcome of the section it completed.
    pub async fn handle_line(&mut self, line: Line, services: &Services) -> Option<Dispatch> {
        match line {
            Line::Text(text) => {
                if let Some(section) = self.open.as_mut() {
                    section.push_line(&text);
                }
                None
            }
            Line::Header(name) => {
                // Finalize the previous section before opening the next
                let dispatch = match self.open.take() {
                    Some(section) => Some(self.submit(section, services).await),
                    None => None,
                };

                if name == "END" {
                    if let Some(node) = self.node() {
                        tracing::debug!(node = node.id, exercise = node.exercise_id, "Submitted {} state", node.name);
                        return dispatch;
                    }
                }
                self.open = Some(Section::open(&name));

                dispatch
            }
        }
    }

    /// Act on a finalized section
    pub async fn submit(&mut self, section: Section, services: &Services) -> Dispatch {
        if section.kind == SectionKind::Uuid {
            let identity = section.body.trim().to_lowercase();
            if self.identity.as_deref() != Some(identity.as_str()) {
                self.resolution = Resolution::Pending;
            }
            self.identity = Some(identity);
        }

        let Some(identity) = self.identity.clone() else {
            return Dispatch::Ignored;
        };

        let Some(node) = self.resolve(&identity, services).await else {
            tracing::error!(uuid = %identity, "Unable to submit {} of {}", section.kind, identity);
            return Dispatch::Unresolved(identity);
        };

        match section.kind {
            SectionKind::Uuid => Dispatch::Identified(node.id),
            SectionKind::Goal(goal) => store_goal(&node, goal, &section.body, services).await,
            SectionKind::QueryResult | SectionKind::UpdateResult => {
                let message = if section.kind == SectionKind::QueryResult {
                    BusMessage::IrrQueryResponse {
                        node: node.id,
                        request: "irr-query".to_string(),
                        response: section.body,
                    }
                } else {
                    BusMessage::IrrUpdateResponse {
                        node: node.id,
                        request: "irr-update".to_string(),
                        response: section.body,
                    }
                };
                services.publish(node.exercise_id, &message).await;
                Dispatch::Responded(section.kind)
            }
            kind => {
                tracing::error!(uuid = %identity, "Unknown section name: [{}] from {}", kind, identity);
                Dispatch::Unknown(kind.name().to_string())
            }
        }
    }

    /// Look up the identity unless the outcome is already known
    async fn resolve(&mut self, identity: &str, services: &Services) -> Option<NodeRecord> {
        match &self.resolution {
            Resolution::Resolved(node) => return Some(node.clone()),
            Resolution::Unknown => return None,
            Resolution::Pending => {}
        }

        match services.directory.resolve_uuid(identity).await {
            Ok(Some(node)) => {
                tracing::info!(node = node.id, exercise = node.exercise_id, "Identified node {} as {}", identity, node.name);
                self.resolution = Resolution::Resolved(node.clone());
                Some(node)
            }
            Ok(None) => {
                self.resolution = Resolution::Unknown;
                None
            }
            Err(e) => {
                // Stays pending, the next section retries
                tracing::warn!(uuid = %identity, error = %e, "Node lookup failed");
                None
            }
        }
    }
}

async fn store_goal(node: &NodeRecord, goal: GoalType, content: &str, services: &Services) -> Dispatch {
    let upsert = match services.store.upsert(node.id, goal, content).await {
        Ok(upsert) => upsert,
        Err(e) => {
            tracing::error!(node = node.id, goal = %goal, error = %e, "Failed to store state");
            return Dispatch::StoreFailed(goal);
        }
    };

    let message = BusMessage::State {
        goal_type: goal.name().to_string(),
        node: node.id,
        content: upsert.record.content,
        ts: upsert.record.last_update,
    };
    services.publish(node.exercise_id, &message).await;

    Dispatch::Stored {
        goal,
        changed: upsert.changed,
    }
}

/// A live inbound connection
pub struct PeerConnection {
    id: ConnectionId,
    addr: SocketAddr,
    state: PeerState,
    codec: SectionCodec,
    outbox: Outbox,
    reader: AbortHandle,
}

impl PeerConnection {
    /// Wrap the write half of an accepted connection; at most `queue` writes
    /// may be pending toward the peer
    pub fn new<W>(id: ConnectionId, addr: SocketAddr, writer: W, queue: usize, reader: AbortHandle) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            id,
            addr,
            state: PeerState::new(),
            codec: SectionCodec::new(),
            outbox: Outbox::spawn(writer, queue),
            reader,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Parser state
    pub fn state_mut(&mut self) -> &mut PeerState {
        &mut self.state
    }

    /// Queue a directive block for the peer. Fails when the peer has stopped
    /// draining earlier writes.
    pub fn send(&mut self, directive: Directive) -> Result<(), OutboxError> {
        let mut block = BytesMut::new();
        self.codec.encode(directive, &mut block)?;
        self.outbox.push(block.freeze())
    }

    /// Stop reading and release the socket
    pub fn close(self) {
        self.reader.abort();
        self.outbox.close();
    }
}

impl Routable for PeerConnection {
    fn node(&self) -> Option<&NodeRecord> {
        self.state.node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::directory::{DirectoryError, MockNodeDirectory, NodeKind};
    use crate::core::store::{MemoryStateStore, StateStore};
    use crate::core::testing::RecordingBus;
    use mockall::predicate::eq;
    use std::sync::Arc;

    struct Harness {
        services: Services,
        store: Arc<MemoryStateStore>,
        bus: Arc<RecordingBus>,
    }

    fn node() -> NodeRecord {
        NodeRecord {
            id: 7,
            exercise_id: 3,
            uuid: "ab12-cd34".into(),
            name: "R1".into(),
            kind: NodeKind::Monitor,
        }
    }

    fn harness(directory: MockNodeDirectory) -> Harness {
        let store = Arc::new(MemoryStateStore::new());
        let bus = Arc::new(RecordingBus::default());
        let services = Services::new(Arc::new(directory), store.clone(), bus.clone());
        Harness { services, store, bus }
    }

    fn known_directory() -> MockNodeDirectory {
        let mut directory = MockNodeDirectory::new();
        directory
            .expect_resolve_uuid()
            .with(eq("ab12-cd34"))
            .times(1)
            .returning(|_| Ok(Some(node())));
        directory
    }

    async fn feed(state: &mut PeerState, services: &Services, lines: &[Line]) -> Vec<Dispatch> {
        let mut dispatched = Vec::new();
        for line in lines {
            if let Some(dispatch) = state.handle_line(line.clone(), services).await {
                dispatched.push(dispatch);
            }
        }
        dispatched
    }

    fn header(name: &str) -> Line {
        Line::Header(name.to_string())
    }

    fn text(line: &str) -> Line {
        Line::Text(line.to_string())
    }

    #[tokio::test]
    async fn test_uuid_is_trimmed_and_lowercased() {
        let h = harness(known_directory());
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[header("UUID"), text("  AB12-cd34"), header("END")],
        )
        .await;

        assert_eq!(dispatched, vec![Dispatch::Identified(7)]);
        assert_eq!(state.identity(), Some("ab12-cd34"));
        assert_eq!(state.node().map(|n| n.id), Some(7));
        // END after resolution closes the context
        assert!(state.open_section().is_none());
    }

    #[tokio::test]
    async fn test_sections_without_identity_have_no_effect() {
        let mut directory = MockNodeDirectory::new();
        directory.expect_resolve_uuid().never();
        let h = harness(directory);
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[
                text("stray line"),
                header("Routes IPv4"),
                text("10.0.0.0/8"),
                header("QUERY-RESULT"),
                text("ok"),
                header("END"),
                header("FOO"),
            ],
        )
        .await;

        assert_eq!(dispatched, vec![Dispatch::Ignored; 3]);
        assert!(h.store.is_empty());
        assert!(h.bus.take().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identity_yields_one_diagnostic_per_section() {
        let mut directory = MockNodeDirectory::new();
        directory.expect_resolve_uuid().times(1).returning(|_| Ok(None));
        let h = harness(directory);
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[
                header("UUID"),
                text("ffff"),
                header("Routes IPv4"),
                text("10.0.0.0/8"),
                header("NEIGHBORS"),
                header("END"),
            ],
        )
        .await;

        assert_eq!(dispatched, vec![Dispatch::Unresolved("ffff".into()); 3]);
        assert!(h.store.is_empty());
        assert!(h.bus.take().is_empty());
        // END without a resolved node opens a section
        assert_eq!(state.open_section(), Some(&SectionKind::End));
    }

    #[tokio::test]
    async fn test_directory_error_is_retried() {
        let mut directory = MockNodeDirectory::new();
        let mut calls = 0;
        directory.expect_resolve_uuid().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(DirectoryError::Unavailable("down".into()))
            } else {
                Ok(Some(node()))
            }
        });
        let h = harness(directory);
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[header("UUID"), text("ab12-cd34"), header("Routes IPv6"), text("::/0"), header("END")],
        )
        .await;

        assert_eq!(
            dispatched,
            vec![
                Dispatch::Unresolved("ab12-cd34".into()),
                Dispatch::Stored {
                    goal: GoalType::RoutesIpv6,
                    changed: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_new_identity_resets_resolution() {
        let mut directory = MockNodeDirectory::new();
        directory
            .expect_resolve_uuid()
            .with(eq("ab12-cd34"))
            .times(1)
            .returning(|_| Ok(Some(node())));
        directory
            .expect_resolve_uuid()
            .with(eq("other"))
            .times(1)
            .returning(|_| Ok(None));
        let h = harness(directory);
        let mut state = PeerState::new();

        feed(&mut state, &h.services, &[header("UUID"), text("AB12-CD34"), header("END")]).await;
        assert!(state.node().is_some());

        let dispatched = feed(&mut state, &h.services, &[header("UUID"), text("other"), header("END")]).await;
        assert_eq!(dispatched, vec![Dispatch::Unresolved("other".into())]);
        assert!(state.node().is_none());
    }

    #[tokio::test]
    async fn test_identical_state_is_stored_once_and_published_twice() {
        let h = harness(known_directory());
        let mut state = PeerState::new();
        let report = [
            header("UUID"),
            text("ab12-cd34"),
            header("ROUTES IPV4"),
            text("10.0.0.0/8"),
            header("END"),
        ];

        feed(&mut state, &h.services, &report).await;
        let dispatched = feed(&mut state, &h.services, &report[2..]).await;

        assert_eq!(
            dispatched,
            vec![Dispatch::Stored {
                goal: GoalType::RoutesIpv4,
                changed: false
            }]
        );
        assert_eq!(h.store.stats().writes(), 1);

        let published = h.bus.take();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "server:3/events");
        assert_eq!(published[0].1["type"], "state");
        assert_eq!(published[0].1["goal_type"], "Routes IPv4");
        assert_eq!(published[0].1["content"], "10.0.0.0/8\n");
        assert_eq!(published[0].1["ts"], published[1].1["ts"]);
    }

    #[tokio::test]
    async fn test_changed_state_bumps_timestamp() {
        let h = harness(known_directory());
        let mut state = PeerState::new();

        feed(&mut state, &h.services, &[header("UUID"), text("ab12-cd34")]).await;
        feed(&mut state, &h.services, &[header("ASN IPv4"), text("A"), header("END")]).await;
        feed(&mut state, &h.services, &[header("ASN IPv4"), text("B"), header("END")]).await;

        assert_eq!(h.store.stats().writes(), 2);

        let published = h.bus.take();
        assert_eq!(published.len(), 2);
        let first = published[0].1["ts"].as_str().unwrap().to_string();
        let second = published[1].1["ts"].as_str().unwrap().to_string();
        let parse = |ts: &str| chrono::DateTime::parse_from_rfc3339(ts).unwrap();
        assert!(parse(&second) > parse(&first));

        let stored = h.store.get(7, GoalType::AsnIpv4).await.unwrap().unwrap();
        assert_eq!(stored.content, "B\n");
        assert_eq!(stored.last_update, parse(&second));
    }

    #[tokio::test]
    async fn test_unknown_section_after_resolution() {
        let h = harness(known_directory());
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[header("UUID"), text("ab12-cd34"), header("FOO"), text("bar"), header("END")],
        )
        .await;

        assert_eq!(
            dispatched,
            vec![Dispatch::Identified(7), Dispatch::Unknown("FOO".into())]
        );
        assert!(h.store.is_empty());
        assert!(h.bus.take().is_empty());
    }

    #[tokio::test]
    async fn test_command_results_are_published() {
        let h = harness(known_directory());
        let mut state = PeerState::new();

        let dispatched = feed(
            &mut state,
            &h.services,
            &[
                header("UUID"),
                text("ab12-cd34"),
                header("QUERY-RESULT"),
                text("route: 10.0.0.0/8"),
                text("origin: AS64500"),
                header("UPDATE-RESULT"),
                text("ok"),
                header("END"),
            ],
        )
        .await;

        assert_eq!(dispatched.len(), 3);
        assert!(h.store.is_empty());

        let published = h.bus.take();
        assert_eq!(published[0].1["type"], "irr-query-response");
        assert_eq!(published[0].1["request"], "irr-query");
        assert_eq!(published[0].1["node"], 7);
        assert_eq!(published[0].1["response"], "route: 10.0.0.0/8\norigin: AS64500\n");
        assert_eq!(published[1].1["type"], "irr-update-response");
        assert_eq!(published[1].1["response"], "ok\n");
    }

    fn connection(writer: tokio::io::DuplexStream, queue: usize) -> PeerConnection {
        let (handle, _registration) = AbortHandle::new_pair();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        PeerConnection::new(1, addr, writer, queue, handle)
    }

    #[tokio::test]
    async fn test_send_writes_blocks() {
        let (near, mut far) = tokio::io::duplex(1024);
        let mut connection = connection(near, 4);

        connection.send(Directive::RequestIdentity).unwrap();
        connection.send(Directive::Query("AS64500".into())).unwrap();
        assert!(connection.node().is_none());
        assert_eq!(connection.id(), 1);

        let expected = b"*****[ ID ]*****\n*****[ END ]*****\n*****[ QUERY ]*****\nAS64500\n*****[ END ]*****\n";
        let mut received = vec![0u8; expected.len()];
        tokio::io::AsyncReadExt::read_exact(&mut far, &mut received).await.unwrap();
        assert_eq!(&received[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_send_to_stalled_peer_fails_fast() {
        // The peer never reads, so its socket buffer fills up
        let (near, _far) = tokio::io::duplex(64);
        let mut connection = connection(near, 2);
        let large = "x".repeat(4096);

        let outcomes: Vec<_> = (0..4)
            .map(|_| connection.send(Directive::Update(large.clone())))
            .collect();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes.last(), Some(Err(OutboxError::Full(2)))));
        connection.close();
    }
}
