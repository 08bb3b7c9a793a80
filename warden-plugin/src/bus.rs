//! Lifecycle and health notifications
//!
//! The host only needs to publish; delivery is up to the [`EventBus`]
//! implementation. [`BroadcastBus`] fans events out in-process and [`NoopBus`]
//! drops them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::HealthState;

/// Bus subjects used by the host
pub mod subjects {
    pub const PLUGIN_STARTED: &str = "plugins.lifecycle.started";
    pub const PLUGIN_STOPPED: &str = "plugins.lifecycle.stopped";
    pub const PLUGIN_ERROR: &str = "plugins.lifecycle.error";
    pub const PLUGIN_HEALTH: &str = "plugins.health";
}

/// Event bus errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish side of a message bus
pub trait EventBus: Send + Sync {
    fn publish(&self, subject: &str, payload: Value) -> Result<(), BusError>;
}

/// Lifecycle event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub plugin_id: String,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Health event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub plugin_id: String,
    pub state: HealthState,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A published message as seen by [`BroadcastBus`] subscribers
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Value,
}

/// In-process bus backed by a tokio broadcast channel
pub struct BroadcastBus {
    tx: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, subject: &str, payload: Value) -> Result<(), BusError> {
        // No subscribers is not an error
        let _ = self.tx.send(BusMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Bus that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl EventBus for NoopBus {
    fn publish(&self, _subject: &str, _payload: Value) -> Result<(), BusError> {
        Ok(())
    }
}

fn publish_event<T: Serialize>(bus: &dyn EventBus, subject: &str, event: &T) {
    let result = serde_json::to_value(event)
        .map_err(BusError::from)
        .and_then(|payload| bus.publish(subject, payload));

    if let Err(e) = result {
        tracing::warn!(target: "plugin_bus", subject, error = %e, "Failed to publish event");
    }
}

/// Publish `plugins.lifecycle.started`
pub fn publish_started(bus: &dyn EventBus, plugin_id: &str, version: &str) {
    let event = LifecycleEvent {
        plugin_id: plugin_id.to_string(),
        event: "started".to_string(),
        timestamp: Utc::now(),
        error: None,
        version: Some(version.to_string()),
    };
    publish_event(bus, subjects::PLUGIN_STARTED, &event);
}

/// Publish `plugins.lifecycle.stopped`
pub fn publish_stopped(bus: &dyn EventBus, plugin_id: &str) {
    let event = LifecycleEvent {
        plugin_id: plugin_id.to_string(),
        event: "stopped".to_string(),
        timestamp: Utc::now(),
        error: None,
        version: None,
    };
    publish_event(bus, subjects::PLUGIN_STOPPED, &event);
}

/// Publish `plugins.lifecycle.error`
pub fn publish_error(bus: &dyn EventBus, plugin_id: &str, error: &str) {
    let event = LifecycleEvent {
        plugin_id: plugin_id.to_string(),
        event: "error".to_string(),
        timestamp: Utc::now(),
        error: Some(error.to_string()),
        version: None,
    };
    publish_event(bus, subjects::PLUGIN_ERROR, &event);
}

/// Publish `plugins.health`
pub fn publish_health(bus: &dyn EventBus, plugin_id: &str, state: HealthState, message: &str) {
    let event = HealthEvent {
        plugin_id: plugin_id.to_string(),
        state,
        message: message.to_string(),
        timestamp: Utc::now(),
    };
    publish_event(bus, subjects::PLUGIN_HEALTH, &event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_bus_delivers() {
        let bus = BroadcastBus::default();
        let mut rx = bus.subscribe();

        publish_error(&bus, "camera", "spawn failed");

        let message = rx.recv().await.unwrap();
        assert_eq!(message.subject, subjects::PLUGIN_ERROR);
        let event: LifecycleEvent = serde_json::from_value(message.payload).unwrap();
        assert_eq!(event.plugin_id, "camera");
        assert_eq!(event.event, "error");
        assert_eq!(event.error.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = BroadcastBus::new(4);
        assert!(bus.publish(subjects::PLUGIN_STOPPED, Value::Null).is_ok());
        assert!(NoopBus.publish(subjects::PLUGIN_HEALTH, Value::Null).is_ok());
    }

    #[tokio::test]
    async fn test_health_payload_shape() {
        let bus = BroadcastBus::default();
        let mut rx = bus.subscribe();

        publish_health(&bus, "detector", HealthState::Degraded, "queue backlog");

        let message = rx.recv().await.unwrap();
        assert_eq!(message.subject, "plugins.health");
        assert_eq!(message.payload["plugin_id"], "detector");
        assert_eq!(message.payload["state"], "degraded");
        assert_eq!(message.payload["message"], "queue backlog");
        assert!(message.payload.get("timestamp").is_some());
    }
}
