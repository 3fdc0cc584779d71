//! In-process bus over a broadcast channel

use super::{glob_pattern, BusError, BusFrame, EventBus, Subscription};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone)]
struct Envelope {
    topic: String,
    payload: String,
}

/// Pub/sub bus shared by daemons running in one process
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBus {
    /// Create a bus buffering up to `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        // No subscribers is not an error for pub/sub
        let _ = self.tx.send(Envelope {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let matcher = glob_pattern(pattern)?;
        let rx = self.tx.subscribe();
        let pattern = pattern.to_string();

        let confirmed = stream::once(future::ready(BusFrame::Subscribed {
            pattern: pattern.clone(),
        }));

        let received = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Err(RecvError::Closed) => None,
                item => Some((item, rx)),
            }
        });

        let frames = received.filter_map(move |item| {
            let frame = match item {
                Ok(envelope) if matcher.is_match(&envelope.topic) => Some(BusFrame::Message {
                    pattern: pattern.clone(),
                    topic: envelope.topic,
                    payload: envelope.payload,
                }),
                Ok(_) | Err(RecvError::Closed) => None,
                Err(RecvError::Lagged(missed)) => Some(BusFrame::Lagged(missed)),
            };
            future::ready(frame)
        });

        Ok(confirmed.chain(frames).boxed())
    }
}
