//! State collector over loopback

use crate::common::{next_event, node};
use labmux_core::core::bus::{EventBus, LocalBus, EVENTS_PATTERN, NOT_AVAILABLE};
use labmux_core::core::collector::{Collector, CollectorConfig};
use labmux_core::core::directory::{NodeKind, StaticDirectory};
use labmux_core::core::protocol::GoalType;
use labmux_core::core::services::Services;
use labmux_core::core::store::{MemoryStateStore, StateStore};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

struct Lab {
    bus: Arc<LocalBus>,
    store: Arc<MemoryStateStore>,
    collector: Collector,
    listener: TcpListener,
}

fn lab() -> Lab {
    let bus = Arc::new(LocalBus::new(64));
    let store = Arc::new(MemoryStateStore::new());
    let directory = StaticDirectory::new(&[
        node(7, "AB12", NodeKind::Irr, None),
        node(8, "cd34", NodeKind::Monitor, None),
    ]);
    let services = Services::new(Arc::new(directory), store.clone(), bus.clone());
    let config = CollectorConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        ..CollectorConfig::default()
    };
    let collector = Collector::new(config, services);
    let listener = collector.bind().unwrap();

    Lab {
        bus,
        store,
        collector,
        listener,
    }
}

/// Drive the collector while the scenario runs
async fn with_collector<F: Future<Output = ()>>(collector: Collector, listener: TcpListener, scenario: F) {
    tokio::select! {
        result = collector.serve(listener) => panic!("collector stopped: {:?}", result),
        () = scenario => {}
    }
}

async fn connect(addr: std::net::SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Identity preamble
    assert_eq!(read_line(&mut reader).await, "*****[ ID ]*****\n");
    assert_eq!(read_line(&mut reader).await, "*****[ END ]*****\n");

    (reader, write_half)
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line
}

#[tokio::test]
async fn test_report_is_stored_and_published() {
    let Lab {
        bus,
        store,
        collector,
        listener,
    } = lab();
    let addr = listener.local_addr().unwrap();
    let mut events = bus.psubscribe(EVENTS_PATTERN).await.unwrap();

    with_collector(collector, listener, async {
        let (_reader, mut writer) = connect(addr).await;

        // Fragmented on purpose
        for chunk in [
            &b"*****[ UUID ]*****\n  AB1"[..],
            b"2  \n*****[ ROUTES IPV4 ]***",
            b"**\n10.0.0.0/8\n*****[ END ]*****\n",
        ] {
            writer.write_all(chunk).await.unwrap();
            writer.flush().await.unwrap();
        }

        let state = next_event(&mut events, "state").await;
        assert_eq!(state["node"], 7);
        assert_eq!(state["goal_type"], "Routes IPv4");
        assert_eq!(state["content"], "10.0.0.0/8\n");

        let record = store.get(7, GoalType::RoutesIpv4).await.unwrap().unwrap();
        assert_eq!(record.content, "10.0.0.0/8\n");
        assert_eq!(store.stats().writes(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_query_is_forwarded_and_answered() {
    let Lab {
        bus,
        collector,
        listener,
        ..
    } = lab();
    let addr = listener.local_addr().unwrap();
    let mut events = bus.psubscribe(EVENTS_PATTERN).await.unwrap();

    with_collector(collector, listener, async {
        let (mut reader, mut writer) = connect(addr).await;
        writer
            .write_all(b"*****[ UUID ]*****\nab12\n*****[ NEIGHBORS ]*****\nAS64501\n*****[ END ]*****\n")
            .await
            .unwrap();
        next_event(&mut events, "state").await;

        bus.publish(
            "server:3/events",
            r#"{"type":"irr-query","node_id":7,"query":"AS64500"}"#.to_string(),
        )
        .await
        .unwrap();

        assert_eq!(read_line(&mut reader).await, "*****[ QUERY ]*****\n");
        assert_eq!(read_line(&mut reader).await, "AS64500\n");
        assert_eq!(read_line(&mut reader).await, "*****[ END ]*****\n");

        writer
            .write_all(b"*****[ QUERY-RESULT ]*****\nroute: 10.0.0.0/8\n*****[ END ]*****\n")
            .await
            .unwrap();

        let response = next_event(&mut events, "irr-query-response").await;
        assert_eq!(response["node"], 7);
        assert_eq!(response["request"], "irr-query");
        assert_eq!(response["response"], "route: 10.0.0.0/8\n");
    })
    .await;
}

#[tokio::test]
async fn test_command_without_connection_gets_synthetic_response() {
    let Lab {
        bus,
        collector,
        listener,
        ..
    } = lab();
    let mut events = bus.psubscribe(EVENTS_PATTERN).await.unwrap();

    with_collector(collector, listener, async {
        // Wait for the collector to subscribe
        while bus.subscriber_count() < 2 {
            tokio::task::yield_now().await;
        }

        bus.publish(
            "server:3/events",
            r#"{"type":"irr-update","node_id":9,"update":"route: 10.0.0.0/8"}"#.to_string(),
        )
        .await
        .unwrap();

        let response = next_event(&mut events, "irr-update-response").await;
        assert_eq!(response["node"], 9);
        assert_eq!(response["response"], NOT_AVAILABLE);
    })
    .await;
}

#[tokio::test]
async fn test_unknown_identity_has_no_effect() {
    let Lab {
        store,
        collector,
        listener,
        ..
    } = lab();
    let addr = listener.local_addr().unwrap();

    with_collector(collector, listener, async {
        let (_reader, mut writer) = connect(addr).await;
        writer
            .write_all(b"*****[ UUID ]*****\nffff\n*****[ Routes IPv6 ]*****\n::/0\n*****[ END ]*****\n")
            .await
            .unwrap();

        // A known node on a second connection is still served
        let (_reader2, mut writer2) = connect(addr).await;
        writer2
            .write_all(b"*****[ UUID ]*****\ncd34\n*****[ Received traffic ]*****\n42\n*****[ END ]*****\n")
            .await
            .unwrap();

        for _ in 0..200 {
            if store.stats().writes() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(store.stats().writes(), 1);
        assert!(store.get(8, GoalType::ReceivedTraffic).await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_peer_that_stops_reading_does_not_stall_others() {
    let Lab {
        bus,
        store,
        collector,
        listener,
    } = lab();
    let addr = listener.local_addr().unwrap();
    let mut events = bus.psubscribe(EVENTS_PATTERN).await.unwrap();

    with_collector(collector, listener, async {
        // Registry node identifies, then never reads again
        let (_stalled_reader, mut stalled) = connect(addr).await;
        stalled
            .write_all(b"*****[ UUID ]*****\nab12\n*****[ NEIGHBORS ]*****\nAS64501\n*****[ END ]*****\n")
            .await
            .unwrap();
        next_event(&mut events, "state").await;

        // Far more than the socket buffers can hold
        let query = "A".repeat(32 * 1024 * 1024);
        let payload = serde_json::json!({"type": "irr-query", "node_id": 7, "query": query});
        bus.publish("server:3/events", payload.to_string()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let served = async {
            let (_reader, mut writer) = connect(addr).await;
            writer
                .write_all(b"*****[ UUID ]*****\ncd34\n*****[ Received traffic ]*****\n42\n*****[ END ]*****\n")
                .await
                .unwrap();
            while store.get(8, GoalType::ReceivedTraffic).await.unwrap().is_none() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };

        tokio::time::timeout(std::time::Duration::from_secs(3), served)
            .await
            .expect("collector loop stalled by a peer that does not read");
    })
    .await;
}
