//! Inventory event consumer.
//!
//! Each message is applied in one transaction that also records its id in
//! the processed-message table. A message whose id is already recorded is
//! acknowledged without effect, so redeliveries are harmless.

mod payload;

pub use payload::{ReservationConfirmed, ReservationRejected};

use async_trait::async_trait;
use chrono::Utc;
use domain::topics;
use messaging::{HandleOutcome, InboundMessage, MessageHandler};
use store::{BillingStore, PROCESSED_MESSAGE_CONSTRAINT, UnitOfWork};

use crate::error::{BillingError, Result};
use crate::service::close_locked;

/// Reason recorded on print requests of an invoice that cannot be closed.
pub const NO_LINE_ITEMS_REASON: &str = "invoice has no line items";

/// Applies inventory reservation outcomes to invoices.
#[derive(Clone)]
pub struct InventoryEventConsumer<S: BillingStore> {
    store: S,
}

impl<S: BillingStore> InventoryEventConsumer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Closes the invoice once its stock is reserved.
    async fn reservation_confirmed(
        &self,
        uow: &mut S::UnitOfWork,
        event: ReservationConfirmed,
    ) -> Result<HandleOutcome> {
        if event.items().is_empty() {
            return Ok(HandleOutcome::Ignored("reservation has no items"));
        }

        let Some(mut invoice) = uow.lock_invoice(event.invoice_id).await? else {
            tracing::warn!(invoice_id = %event.invoice_id, "reservation for unknown invoice");
            return Ok(HandleOutcome::Ignored("invoice not found"));
        };

        if !invoice.is_open() {
            return Ok(HandleOutcome::Ignored("invoice not open"));
        }

        if invoice.items().is_empty() {
            let failed = uow
                .fail_pending_print_requests(invoice.id(), NO_LINE_ITEMS_REASON)
                .await?;
            tracing::warn!(invoice_id = %invoice.id(), failed, "reserved invoice has no line items");
            return Ok(HandleOutcome::Ignored(NO_LINE_ITEMS_REASON));
        }

        let completed = close_locked(uow, &mut invoice).await?;
        metrics::counter!("invoices_closed_total", "trigger" => "reservation").increment(1);
        tracing::info!(invoice_id = %invoice.id(), completed_print_requests = completed, "invoice closed by reservation");
        Ok(HandleOutcome::Applied)
    }

    /// Fails the pending print requests of the invoice.
    async fn reservation_rejected(
        &self,
        uow: &mut S::UnitOfWork,
        event: ReservationRejected,
    ) -> Result<HandleOutcome> {
        let failed = uow
            .fail_pending_print_requests(event.invoice_id, event.reason())
            .await?;
        tracing::info!(invoice_id = %event.invoice_id, failed, reason = event.reason(), "reservation rejected");
        Ok(HandleOutcome::Applied)
    }
}

#[async_trait]
impl<S: BillingStore> MessageHandler for InventoryEventConsumer<S> {
    type Error = BillingError;

    #[tracing::instrument(skip(self, message), fields(routing_key = %message.routing_key))]
    async fn handle(&self, message: &InboundMessage) -> Result<HandleOutcome> {
        let message_id = message.dedup_id();
        let mut uow = self.store.begin().await?;

        if uow.is_processed(&message_id).await? {
            uow.commit().await?;
            return Ok(HandleOutcome::Duplicate);
        }

        let outcome = match message.routing_key.as_str() {
            topics::RESERVATION_CONFIRMED => {
                let event = ReservationConfirmed::parse(&message.body)?;
                self.reservation_confirmed(&mut uow, event).await?
            }
            topics::RESERVATION_REJECTED => {
                let event = ReservationRejected::parse(&message.body)?;
                self.reservation_rejected(&mut uow, event).await?
            }
            _ => return Ok(HandleOutcome::Unrecognized),
        };

        let recorded = uow.record_processed(&message_id, Utc::now()).await;
        match recorded {
            Ok(()) => {}
            // Another worker applied the same message concurrently.
            Err(e) if e.is_duplicate_of(PROCESSED_MESSAGE_CONSTRAINT) => {
                return Ok(HandleOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }
        uow.commit().await?;
        Ok(outcome)
    }
}
