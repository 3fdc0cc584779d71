//! Redis pub/sub bus
//!
//! Lets the collector and the relay run as separate processes next to the
//! web application, which publishes commands and reads events on the same
//! Redis server.

use super::{BusError, BusFrame, EventBus, Subscription};
use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, Msg, RedisError};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use tokio::sync::OnceCell;

/// Bus backed by a Redis server
pub struct RedisBus {
    client: Client,
    /// Connection used for publishing, opened on first use
    publisher: OnceCell<MultiplexedConnection>,
}

impl RedisBus {
    /// Prepare a client for `url` (`redis://host:port/db`). Nothing is
    /// connected until the first publish or subscription.
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url).map_err(transport)?;
        Ok(Self {
            client,
            publisher: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, BusError> {
        let connection = self
            .publisher
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(transport)?;
        Ok(connection.clone())
    }
}

fn transport(e: RedisError) -> BusError {
    BusError::Transport(e.to_string())
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let mut connection = self.publisher().await?;
        let _receivers: i64 = connection.publish(topic, payload).await.map_err(transport)?;
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(transport)?;
        pubsub.psubscribe(pattern).await.map_err(transport)?;
        tracing::info!(%pattern, "Subscribed to redis");

        let confirmed = stream::once(future::ready(BusFrame::Subscribed {
            pattern: pattern.to_string(),
        }));
        let messages = pubsub
            .into_on_message()
            .filter_map(|message| future::ready(frame(&message)));

        Ok(confirmed.chain(messages).boxed())
    }
}

fn frame(message: &Msg) -> Option<BusFrame> {
    let topic = message.get_channel_name().to_string();
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(%topic, error = %e, "Dropping non-text bus message");
            return None;
        }
    };
    let pattern = message
        .get_pattern::<Option<String>>()
        .ok()
        .flatten()
        .unwrap_or_default();

    Some(BusFrame::Message {
        pattern,
        topic,
        payload,
    })
}
