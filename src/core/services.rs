//! Collaborator handles shared by both daemons

use super::bus::{events_topic, BusMessage, EventBus};
use super::directory::NodeDirectory;
use super::store::StateStore;
use std::sync::Arc;

/// Explicit handles to the external collaborators
#[derive(Clone)]
pub struct Services {
    /// Node directory
    pub directory: Arc<dyn NodeDirectory>,
    /// State store
    pub store: Arc<dyn StateStore>,
    /// Event bus
    pub bus: Arc<dyn EventBus>,
}

impl Services {
    /// Bundle collaborator handles
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        store: Arc<dyn StateStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            directory,
            store,
            bus,
        }
    }

    /// Publish on an exercise topic. Failures are logged, never returned.
    pub async fn publish(&self, exercise_id: u64, message: &BusMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(exercise = exercise_id, error = %e, "Failed to encode bus message");
                return;
            }
        };

        if let Err(e) = self.bus.publish(&events_topic(exercise_id), payload).await {
            tracing::warn!(exercise = exercise_id, error = %e, "Failed to publish bus message");
        }
    }
}
