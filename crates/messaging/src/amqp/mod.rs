//! AMQP (RabbitMQ) transport.
//!
//! Outbound events go to a durable topic exchange with the event type as
//! routing key. Inbound events are consumed from a durable queue bound to
//! the inventory exchange.

mod consumer;

pub use consumer::AmqpConsumer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::{
    BasicProperties, Channel, ExchangeKind,
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{BusError, EventBus, OutboundMessage, Result};

/// Publish attempts after the first one, per message.
const MAX_RETRIES: usize = 3;

/// AMQP connection and topology settings.
#[derive(Clone, Debug)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Exchange outbound events are published to.
    pub outbound_exchange: String,
    /// Exchange inbound events arrive on.
    pub inbound_exchange: String,
    /// Durable queue consumed by this service.
    pub inbound_queue: String,
    /// Routing keys the inbound queue is bound to.
    pub inbound_routing_keys: Vec<String>,
    /// Unacknowledged deliveries allowed per consumer channel.
    pub prefetch: u16,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl AmqpConfig {
    /// Creates a config with the default exchange and queue names.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound_exchange: "billing-events".to_string(),
            inbound_exchange: "inventory-events".to_string(),
            inbound_queue: "billing-inventory-events".to_string(),
            inbound_routing_keys: Vec::new(),
            prefetch: 1,
            pool_size: 10,
        }
    }

    /// Sets the routing keys the inbound queue is bound to.
    pub fn with_inbound_routing_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inbound_routing_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// AMQP event bus implementation using RabbitMQ.
///
/// Publishes with publisher confirms and persistent delivery mode. A cached
/// channel is reused until it fails.
#[derive(Clone)]
pub struct AmqpEventBus {
    pool: Pool,
    config: AmqpConfig,
    channel: Arc<Mutex<Option<Channel>>>,
}

impl AmqpEventBus {
    /// Connects to the broker and declares the outbound exchange.
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let manager = Manager::new(config.url.clone(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {e}")))?;

        let bus = Self {
            pool,
            config,
            channel: Arc::new(Mutex::new(None)),
        };

        let channel = bus.open_channel().await?;
        channel
            .exchange_declare(
                &bus.config.outbound_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare exchange: {e}")))?;
        *bus.channel.lock().await = Some(channel);

        info!(exchange = %bus.config.outbound_exchange, "connected to AMQP");
        Ok(bus)
    }

    /// Returns the connection pool, shared with consumers.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    /// Builds a consumer sharing this bus's connection pool.
    pub fn consumer(&self) -> AmqpConsumer {
        AmqpConsumer::new(self.pool.clone(), self.config.clone())
    }

    async fn open_channel(&self) -> Result<Channel> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to enable confirms: {e}")))?;

        Ok(channel)
    }

    async fn channel(&self) -> Result<Channel> {
        let mut cached = self.channel.lock().await;
        if let Some(channel) = cached.as_ref()
            && channel.status().connected()
        {
            return Ok(channel.clone());
        }

        let channel = self.open_channel().await?;
        *cached = Some(channel.clone());
        Ok(channel)
    }

    async fn discard_channel(&self) {
        *self.channel.lock().await = None;
    }

    async fn publish_once(&self, message: &OutboundMessage) -> Result<()> {
        let channel = self.channel().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_message_id(message.message_id.clone().into())
            .with_kind(message.routing_key.clone().into())
            .with_app_id(message.source.clone().into())
            .with_timestamp(u64::try_from(message.occurred_at.timestamp()).unwrap_or_default());

        let confirm = channel
            .basic_publish(
                &self.config.outbound_exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(format!("Failed to publish: {e}")))?;

        let confirmation = confirm
            .await
            .map_err(|e| BusError::Publish(format!("Publish confirmation failed: {e}")))?;

        if confirmation.is_nack() {
            return Err(BusError::Publish("Broker rejected the message".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for AmqpEventBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(routing_key = %message.routing_key, message_id = %message.message_id))]
    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(MAX_RETRIES)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(message).await {
                Ok(()) => {
                    debug!(exchange = %self.config.outbound_exchange, "published message");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "publish failed"
                    );
                    self.discard_channel().await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string())))
    }

    async fn health_check(&self) -> Result<()> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;

        if conn.status().connected() {
            Ok(())
        } else {
            Err(BusError::Connection("AMQP connection is not open".to_string()))
        }
    }
}
