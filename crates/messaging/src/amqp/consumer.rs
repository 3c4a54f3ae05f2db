use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Pool, PoolError};
use futures_util::StreamExt;
use lapin::{
    ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::AmqpConfig;
use crate::{Acknowledgement, BusError, InboundMessage, MessageHandler, Result, dispatch};

impl From<&Delivery> for InboundMessage {
    fn from(delivery: &Delivery) -> Self {
        Self {
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_string(),
            body: delivery.data.clone(),
            redelivered: delivery.redelivered,
        }
    }
}

/// Consumes the inbound queue and feeds a [`MessageHandler`].
///
/// Deliveries are acknowledged manually, one at a time, after the handler
/// returns. Reconnects with exponential backoff and jitter when the
/// connection drops.
#[derive(Clone)]
pub struct AmqpConsumer {
    pool: Pool,
    config: AmqpConfig,
}

impl AmqpConsumer {
    pub fn new(pool: Pool, config: AmqpConfig) -> Self {
        Self { pool, config }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    ///
    /// A delivery that is being handled when shutdown arrives is finished
    /// and acknowledged before returning.
    pub async fn run<H: MessageHandler>(
        self,
        tag: String,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let backoff_builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter();

        let mut backoff_iter = backoff_builder.build();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let setup = tokio::select! {
                result = self.setup_consumer(&tag) => result,
                _ = shutdown.changed() => break,
            };

            match setup {
                Ok(mut consumer) => {
                    info!(queue = %self.config.inbound_queue, %tag, "consumer connected");
                    backoff_iter = backoff_builder.build();

                    loop {
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => {
                                info!(%tag, "consumer stopping");
                                return;
                            }
                            delivery = consumer.next() => match delivery {
                                Some(Ok(delivery)) => Self::process_delivery(handler.as_ref(), delivery).await,
                                Some(Err(e)) => {
                                    error!(error = %e, "consumer delivery error, will reconnect");
                                    break;
                                }
                                None => {
                                    info!(%tag, "consumer stream ended, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, %tag, "failed to set up consumer");
                }
            }

            let delay = backoff_iter.next().unwrap_or(Duration::from_secs(30));
            info!(backoff_ms = %delay.as_millis(), "retrying consumer setup after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(%tag, "consumer stopped");
    }

    /// Declares the topology and starts a consumer with the configured prefetch.
    async fn setup_consumer(&self, tag: &str) -> Result<lapin::Consumer> {
        let conn = self.pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {e}"))
        })?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {e}")))?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to set QoS: {e}")))?;

        channel
            .exchange_declare(
                &self.config.inbound_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare exchange: {e}")))?;

        channel
            .queue_declare(
                &self.config.inbound_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to declare queue: {e}")))?;

        for routing_key in &self.config.inbound_routing_keys {
            channel
                .queue_bind(
                    &self.config.inbound_queue,
                    &self.config.inbound_exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BusError::Subscribe(format!("Failed to bind queue: {e}")))?;

            info!(queue = %self.config.inbound_queue, %routing_key, "bound queue to exchange");
        }

        channel
            .basic_consume(
                &self.config.inbound_queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer: {e}")))
    }

    async fn process_delivery<H: MessageHandler>(handler: &H, delivery: Delivery) {
        let message = InboundMessage::from(&delivery);

        let result = match dispatch(handler, &message).await {
            Acknowledgement::Ack => delivery.ack(BasicAckOptions::default()).await,
            Acknowledgement::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
            }
        };

        if let Err(e) = result {
            error!(error = %e, delivery_tag = message.delivery_tag, "failed to settle delivery");
        }
    }
}
