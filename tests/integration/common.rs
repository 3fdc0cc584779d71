//! Shared helpers

use futures::StreamExt;
use labmux_core::core::bus::{BusFrame, Subscription};
use labmux_core::core::directory::{ConsoleInfo, NodeEntry, NodeKind};
use serde_json::Value;
use std::time::Duration;

/// Wait for the next event of a given type, skipping everything else
pub async fn next_event(events: &mut Subscription, kind: &str) -> Value {
    let wait = async {
        while let Some(frame) = events.next().await {
            if let BusFrame::Message { payload, .. } = frame {
                let value: Value = serde_json::from_str(&payload).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
        panic!("subscription ended while waiting for {}", kind);
    };

    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", kind))
}

/// A node entry for exercise 3
pub fn node(id: u64, uuid: &str, kind: NodeKind, console: Option<ConsoleInfo>) -> NodeEntry {
    NodeEntry {
        id,
        exercise: 3,
        uuid: uuid.to_string(),
        name: format!("R{}", id),
        kind,
        console,
    }
}
