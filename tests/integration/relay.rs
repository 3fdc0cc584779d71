//! Telnet relay over loopback

use crate::common::{next_event, node};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use labmux_core::core::bus::{EventBus, LocalBus, Subscription, EVENTS_PATTERN};
use labmux_core::core::directory::{ConsoleInfo, NodeKind, StaticDirectory};
use labmux_core::core::relay::{Relay, RelayConfig};
use labmux_core::core::services::Services;
use labmux_core::core::store::MemoryStateStore;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const IAC: u8 = 255;
const WILL: u8 = 251;
const DO: u8 = 253;
const ECHO: u8 = 1;

fn relay(bus: Arc<LocalBus>, console_port: u16) -> Relay {
    let directory = StaticDirectory::new(&[
        node(7, "ab12", NodeKind::Work, Some(ConsoleInfo::telnet("0.0.0.0", console_port))),
        node(
            8,
            "cd34",
            NodeKind::Work,
            Some(ConsoleInfo {
                console_type: "vnc".to_string(),
                host: "127.0.0.1".to_string(),
                port: 5900,
            }),
        ),
    ]);
    let services = Services::new(Arc::new(directory), Arc::new(MemoryStateStore::new()), bus);
    Relay::new(RelayConfig::default(), services)
}

/// Drive the relay while the scenario runs; the scenario starts once the relay
/// is subscribed
async fn with_relay<F: Future<Output = ()>>(relay: Relay, bus: &LocalBus, scenario: F) {
    let baseline = bus.subscriber_count();
    let ready = async {
        while bus.subscriber_count() <= baseline {
            tokio::task::yield_now().await;
        }
        scenario.await;
    };

    tokio::select! {
        result = relay.run() => panic!("relay stopped: {:?}", result),
        () = ready => {}
    }
}

async fn input(bus: &LocalBus, node_id: u64, data: &str) {
    let payload = serde_json::json!({"type": "terminal-input", "node_id": node_id, "data": data});
    bus.publish("server:3/events", payload.to_string()).await.unwrap();
}

#[tokio::test]
async fn test_terminal_round_trip() {
    let console = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = console.local_addr().unwrap().port();
    let bus = Arc::new(LocalBus::new(64));
    let mut events: Subscription = bus.psubscribe(EVENTS_PATTERN).await.unwrap();
    let relay = relay(bus.clone(), port);

    with_relay(relay, &bus, async {
        input(&bus, 7, "ls\n").await;

        let (mut session, _) = console.accept().await.unwrap();
        let mut received = [0u8; 3];
        session.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ls\n");

        // Negotiation is answered and stripped from the output
        session.write_all(&[IAC, WILL, ECHO]).await.unwrap();
        session.write_all(b"file1\n").await.unwrap();

        let mut reply = [0u8; 3];
        session.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [IAC, DO, ECHO]);

        let output = next_event(&mut events, "terminal-output").await;
        assert_eq!(output["node_id"], 7);
        assert_eq!(output["data"], BASE64.encode(b"file1\n"));

        // The session is reused
        input(&bus, 7, "pwd\n").await;
        let mut received = [0u8; 4];
        session.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"pwd\n");
    })
    .await;
}

#[tokio::test]
async fn test_closed_console_is_redialled() {
    let console = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = console.local_addr().unwrap().port();
    let bus = Arc::new(LocalBus::new(64));
    let relay = relay(bus.clone(), port);

    with_relay(relay, &bus, async {
        input(&bus, 7, "a").await;
        let (mut first, _) = console.accept().await.unwrap();
        let mut byte = [0u8; 1];
        first.read_exact(&mut byte).await.unwrap();
        drop(first);

        // Give the relay a moment to notice the hang-up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        input(&bus, 7, "b").await;
        let (mut second, _) = console.accept().await.unwrap();
        second.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"b");
    })
    .await;
}

#[tokio::test]
async fn test_unserviceable_node_gets_warning() {
    let bus = Arc::new(LocalBus::new(64));
    let mut events = bus.psubscribe(EVENTS_PATTERN).await.unwrap();
    let relay = relay(bus.clone(), 1);

    with_relay(relay, &bus, async {
        input(&bus, 8, "ls\n").await;
        let warning = next_event(&mut events, "warning").await;
        assert_eq!(warning["node_id"], 8);

        input(&bus, 99, "ls\n").await;
        let warning = next_event(&mut events, "warning").await;
        assert_eq!(warning["node_id"], 99);
    })
    .await;
}
