use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Stable id, identical across re-publications of the same event.
    pub message_id: String,
    /// Event type, used as routing key.
    pub routing_key: String,
    /// Name of the publishing service.
    pub source: String,
    /// JSON body.
    pub payload: Vec<u8>,
    pub occurred_at: DateTime<Utc>,
}

impl OutboundMessage {
    /// Builds a message with a JSON-encoded body.
    pub fn json(
        message_id: impl Into<String>,
        routing_key: impl Into<String>,
        source: impl Into<String>,
        payload: &serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            message_id: message_id.into(),
            routing_key: routing_key.into(),
            source: source.into(),
            payload: serde_json::to_vec(payload)?,
            occurred_at,
        })
    }

    /// Decodes the body back into JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Destination of published domain events.
///
/// Constructed once at process start and handed to every component that
/// publishes. Delivery is at-least-once: a publish that returns an error
/// may still have reached the broker.
#[async_trait]
pub trait EventBus: Send + Sync + Clone + 'static {
    /// Publishes one message and waits for the broker to accept it.
    async fn publish(&self, message: &OutboundMessage) -> Result<()>;

    /// Checks that the bus is reachable.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
