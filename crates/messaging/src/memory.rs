//! In-memory event bus for tests.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::{BusError, EventBus, OutboundMessage, Result};

#[derive(Debug, Default)]
struct InMemoryBusState {
    published: Vec<OutboundMessage>,
    fail_on_publish: bool,
    failing_messages: HashSet<String>,
    unhealthy: bool,
}

/// Event bus that records published messages in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<RwLock<InMemoryBusState>>,
}

impl InMemoryEventBus {
    /// Creates a new in-memory bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryBusState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryBusState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every publish fail while set.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.write().fail_on_publish = fail;
    }

    /// Makes publishes of the given message id fail while set.
    pub fn set_fail_on_message(&self, message_id: &str, fail: bool) {
        let mut state = self.write();
        if fail {
            state.failing_messages.insert(message_id.to_string());
        } else {
            state.failing_messages.remove(message_id);
        }
    }

    /// Makes the health check fail while set.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.write().unhealthy = unhealthy;
    }

    /// Returns every accepted message in publish order.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.read().published.clone()
    }

    /// Returns the accepted messages with the given routing key.
    pub fn published_to(&self, routing_key: &str) -> Vec<OutboundMessage> {
        self.read()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.read().published.len()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        let mut state = self.write();
        if state.fail_on_publish {
            return Err(BusError::Publish("in-memory bus is failing".to_string()));
        }
        if state.failing_messages.contains(&message.message_id) {
            return Err(BusError::Publish(format!(
                "message {} rejected",
                message.message_id
            )));
        }
        state.published.push(message.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.read().unhealthy {
            return Err(BusError::Connection("in-memory bus is down".to_string()));
        }
        Ok(())
    }
}
