//! Outbox polling publisher.

use std::time::Duration;

use chrono::Utc;
use messaging::{BusError, EventBus, OutboundMessage};
use store::{BillingStore, OutboxEvent};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

/// Service name stamped on published messages unless configured otherwise.
pub const DEFAULT_SOURCE: &str = "billing";

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Builds the bus message for an outbox row.
///
/// The message id is derived from the row id, so every re-publication of
/// the same row carries the same id.
pub fn outbound_message(
    event: &OutboxEvent,
    source: &str,
) -> std::result::Result<OutboundMessage, BusError> {
    OutboundMessage::json(
        format!("{source}-outbox-{}", event.id),
        event.event_type.as_str(),
        source,
        &event.payload,
        event.occurred_at,
    )
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Pause between two polls.
    pub interval: Duration,
    /// Maximum rows forwarded per poll.
    pub batch_size: usize,
    pub source: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 50,
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.published == 0 && self.failed == 0
    }
}

/// Forwards unpublished outbox rows to the event bus.
///
/// Rows are sent oldest first. A row is stamped published only after the
/// bus accepted it; a row that fails stays pending and is retried on the
/// next poll. Publication is at-least-once.
pub struct OutboxPublisher<S: BillingStore, B: EventBus> {
    store: S,
    bus: B,
    config: PublisherConfig,
}

impl<S: BillingStore, B: EventBus> OutboxPublisher<S, B> {
    /// The poll interval is raised to at least one millisecond and the
    /// batch size to at least one row.
    pub fn new(store: S, bus: B, mut config: PublisherConfig) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        config.batch_size = config.batch_size.max(1);
        Self { store, bus, config }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Forwards one batch of pending rows.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<PublishReport> {
        let pending = self.store.drain_pending(self.config.batch_size).await?;
        metrics::histogram!("outbox_batch_size").record(pending.len() as f64);

        let mut report = PublishReport::default();
        for event in &pending {
            match self.publish(event).await {
                Ok(()) => {
                    report.published += 1;
                    metrics::counter!("outbox_events_published_total").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    tracing::warn!(
                        outbox_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "outbox event not published"
                    );
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                published = report.published,
                failed = report.failed,
                "outbox batch forwarded"
            );
        }
        Ok(report)
    }

    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let message = outbound_message(event, &self.config.source)?;
        self.bus.publish(&message).await?;
        self.store.mark_published(event.id, Utc::now()).await?;
        Ok(())
    }

    /// Polls until `shutdown` turns true.
    ///
    /// A batch in progress is finished before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.config.batch_size,
            "outbox publisher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{InvoiceId, OutboxEventId};
    use messaging::InMemoryEventBus;
    use store::InMemoryStore;

    fn row(id: i64) -> OutboxEvent {
        OutboxEvent {
            id: OutboxEventId::new(id),
            event_type: "invoice.closed".to_string(),
            aggregate_id: InvoiceId::new(),
            payload: serde_json::json!({ "invoiceId": "x" }),
            occurred_at: Utc::now(),
            published_at: None,
        }
    }

    #[test]
    fn message_id_is_stable_per_row() {
        let event = row(42);
        let first = outbound_message(&event, "billing").unwrap();
        let second = outbound_message(&event, "billing").unwrap();

        assert_eq!(first.message_id, "billing-outbox-42");
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(first.routing_key, "invoice.closed");
        assert_eq!(first.payload_json().unwrap(), event.payload);
    }

    #[test]
    fn default_config() {
        let config = PublisherConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.source, "billing");
    }

    #[test]
    fn zero_interval_and_batch_size_are_raised() {
        let config = PublisherConfig {
            interval: Duration::ZERO,
            batch_size: 0,
            ..PublisherConfig::default()
        };
        let publisher = OutboxPublisher::new(InMemoryStore::new(), InMemoryEventBus::new(), config);

        assert_eq!(publisher.config().interval, Duration::from_millis(1));
        assert_eq!(publisher.config().batch_size, 1);
    }

    #[tokio::test]
    async fn zero_interval_publisher_runs_until_shutdown() {
        let config = PublisherConfig {
            interval: Duration::ZERO,
            ..PublisherConfig::default()
        };
        let publisher = OutboxPublisher::new(InMemoryStore::new(), InMemoryEventBus::new(), config);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(publisher.run(rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("publisher did not stop")
            .expect("publisher task panicked");
    }
}
