//! Test doubles shared by unit tests

use super::bus::{BusError, EventBus, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// Bus that records every publish and cannot be subscribed to
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingBus {
    /// Drain recorded (topic, payload) pairs
    pub fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.published.lock())
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let value = serde_json::from_str(&payload)?;
        self.published.lock().push((topic.to_string(), value));
        Ok(())
    }

    async fn psubscribe(&self, _pattern: &str) -> Result<Subscription, BusError> {
        Err(BusError::Transport("not subscribable".into()))
    }
}
