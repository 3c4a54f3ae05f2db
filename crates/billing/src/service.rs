//! Invoice commands and the idempotent print request.

use chrono::Utc;
use common::{InvoiceId, OutboxEventId, PrintRequestId};
use domain::{IdempotencyKey, Invoice, InvoiceStatus, LineItem, PrintRequest};
use messaging::EventBus;
use store::{
    BillingStore, IDEMPOTENCY_KEY_CONSTRAINT, NewOutboxEvent, OutboxEvent, UnitOfWork,
};

use crate::commands::{AddLineItem, CreateInvoice};
use crate::error::{BillingError, Result};
use crate::publisher::{DEFAULT_SOURCE, outbound_message};

/// Result of a print request.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintRequestOutcome {
    /// A new request was recorded and the print was requested downstream.
    Created(PrintRequest),
    /// The idempotency key was already used. Nothing changed.
    Replayed(PrintRequest),
}

impl PrintRequestOutcome {
    pub fn request(&self) -> &PrintRequest {
        match self {
            PrintRequestOutcome::Created(request) | PrintRequestOutcome::Replayed(request) => {
                request
            }
        }
    }

    pub fn into_request(self) -> PrintRequest {
        match self {
            PrintRequestOutcome::Created(request) | PrintRequestOutcome::Replayed(request) => {
                request
            }
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PrintRequestOutcome::Replayed(_))
    }
}

/// Service for invoice operations.
///
/// Every state change is committed in one transaction together with the
/// outbox row that announces it. The bus is only used for the best-effort
/// forward of a fresh print request; everything else reaches the bus
/// through the [`crate::OutboxPublisher`].
#[derive(Clone)]
pub struct InvoiceService<S: BillingStore, B: EventBus> {
    store: S,
    bus: B,
    source: String,
}

impl<S: BillingStore, B: EventBus> InvoiceService<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    /// Sets the service name stamped on forwarded messages.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Creates an OPEN invoice and appends `invoice.created`.
    #[tracing::instrument(skip(self, cmd), fields(number = %cmd.number))]
    pub async fn create_invoice(&self, cmd: CreateInvoice) -> Result<Invoice> {
        let mut invoice = Invoice::open(&cmd.number, cmd.customer)?;
        for item in cmd.items {
            invoice.add_line_item(item.product_id, item.quantity, item.unit_price)?;
        }
        let event = NewOutboxEvent::from_event(&invoice.created_event())?;

        let mut uow = self.store.begin().await?;
        uow.insert_invoice(&invoice).await?;
        uow.append(event).await?;
        uow.commit().await?;

        metrics::counter!("invoices_created_total").increment(1);
        tracing::info!(invoice_id = %invoice.id(), items = invoice.item_count(), "invoice created");
        Ok(invoice)
    }

    /// Adds a line item to an open invoice.
    #[tracing::instrument(skip(self))]
    pub async fn add_line_item(&self, cmd: AddLineItem) -> Result<LineItem> {
        let mut uow = self.store.begin().await?;
        let mut invoice = uow
            .lock_invoice(cmd.invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(cmd.invoice_id))?;

        let item = invoice.add_line_item(cmd.item.product_id, cmd.item.quantity, cmd.item.unit_price)?;
        uow.insert_line_item(&item).await?;
        uow.commit().await?;

        tracing::debug!(line_item_id = %item.id, "line item added");
        Ok(item)
    }

    /// Closes an open invoice that has line items.
    ///
    /// Pending print requests of the invoice are completed in the same
    /// transaction.
    #[tracing::instrument(skip(self))]
    pub async fn close_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice> {
        let mut uow = self.store.begin().await?;
        let mut invoice = uow
            .lock_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(invoice_id))?;

        let completed = close_locked(&mut uow, &mut invoice).await?;
        uow.commit().await?;

        metrics::counter!("invoices_closed_total", "trigger" => "manual").increment(1);
        tracing::info!(%invoice_id, completed_print_requests = completed, "invoice closed");
        Ok(invoice)
    }

    /// Requests a print of an open invoice, at most once per idempotency key.
    ///
    /// A key seen before returns the stored request unchanged, whatever the
    /// current state of the invoice. A new request is committed with its
    /// `invoice.print-requested` outbox row and then forwarded to the bus
    /// right away. A failed forward is left to the outbox publisher.
    #[tracing::instrument(skip(self))]
    pub async fn request_print(
        &self,
        invoice_id: InvoiceId,
        raw_key: &str,
    ) -> Result<PrintRequestOutcome> {
        let key = IdempotencyKey::parse(raw_key)?;

        if let Some(existing) = self.store.find_print_request_by_key(&key).await? {
            return Ok(self.replayed(invoice_id, existing));
        }

        let mut uow = self.store.begin().await?;
        let invoice = uow
            .lock_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(invoice_id))?;
        invoice.ensure_printable()?;

        let request = PrintRequest::pending(invoice_id, key.clone());
        let inserted = uow.insert_print_request(&request).await;
        match inserted {
            Ok(()) => {}
            Err(e) if e.is_duplicate_of(IDEMPOTENCY_KEY_CONSTRAINT) => {
                // Lost the race for this key. The transaction is unusable.
                drop(uow);
                return match self.store.find_print_request_by_key(&key).await? {
                    Some(winner) => Ok(self.replayed(invoice_id, winner)),
                    None => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        }

        let event = NewOutboxEvent::from_event(&invoice.print_requested_event())?;
        let outbox_id = uow.append(event.clone()).await?;
        uow.commit().await?;

        metrics::counter!("print_requests_total", "outcome" => "created").increment(1);
        tracing::info!(print_request_id = %request.id(), "print requested");

        self.forward(outbox_id, event).await;
        Ok(PrintRequestOutcome::Created(request))
    }

    fn replayed(&self, invoice_id: InvoiceId, existing: PrintRequest) -> PrintRequestOutcome {
        if existing.invoice_id() != invoice_id {
            tracing::warn!(
                key = existing.idempotency_key().as_str(),
                bound_invoice_id = %existing.invoice_id(),
                "idempotency key reused for another invoice"
            );
        }
        metrics::counter!("print_requests_total", "outcome" => "replayed").increment(1);
        PrintRequestOutcome::Replayed(existing)
    }

    /// Publishes a freshly committed outbox row and stamps it on success.
    async fn forward(&self, id: OutboxEventId, event: NewOutboxEvent) {
        let row = OutboxEvent {
            id,
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            payload: event.payload,
            occurred_at: event.occurred_at,
            published_at: None,
        };

        let published = match outbound_message(&row, &self.source) {
            Ok(message) => self.bus.publish(&message).await,
            Err(e) => Err(e),
        };

        match published {
            Ok(()) => {
                metrics::counter!("outbox_events_published_total").increment(1);
                if let Err(e) = self.store.mark_published(id, Utc::now()).await {
                    tracing::warn!(outbox_id = %id, error = %e, "forwarded event not marked published");
                }
            }
            Err(e) => {
                metrics::counter!("outbox_publish_failures_total").increment(1);
                tracing::warn!(outbox_id = %id, error = %e, "forward failed, left to the outbox publisher");
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice> {
        self.store
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(invoice_id))
    }

    /// Lists invoices, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        Ok(self.store.list_invoices(status).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_print_request(&self, id: PrintRequestId) -> Result<PrintRequest> {
        self.store
            .find_print_request(id)
            .await?
            .ok_or_else(|| BillingError::print_request_not_found(id))
    }

    /// Attaches the rendered artifact to the print requests of an invoice.
    ///
    /// Returns how many requests took the artifact.
    #[tracing::instrument(skip(self))]
    pub async fn record_artifact(&self, invoice_id: InvoiceId, url: &str) -> Result<u64> {
        let url = url.trim();
        if url.is_empty() {
            return Err(BillingError::BlankField {
                field: "artifact url",
            });
        }

        let mut uow = self.store.begin().await?;
        uow.lock_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(invoice_id))?;
        let attached = uow.attach_artifact(invoice_id, url, Utc::now()).await?;
        uow.commit().await?;

        tracing::info!(attached, "print artifact recorded");
        Ok(attached)
    }

    /// Marks the pending print requests of an invoice as failed.
    #[tracing::instrument(skip(self))]
    pub async fn fail_print(&self, invoice_id: InvoiceId, reason: &str) -> Result<u64> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BillingError::BlankField { field: "reason" });
        }

        let mut uow = self.store.begin().await?;
        uow.lock_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::invoice_not_found(invoice_id))?;
        let failed = uow.fail_pending_print_requests(invoice_id, reason).await?;
        uow.commit().await?;

        tracing::info!(failed, "print failure recorded");
        Ok(failed)
    }
}

/// Closes an invoice whose row is locked by `uow`.
///
/// Persists the new status, appends `invoice.closed` and completes the
/// pending print requests. Returns how many requests were completed.
pub(crate) async fn close_locked<U: UnitOfWork>(uow: &mut U, invoice: &mut Invoice) -> Result<u64> {
    let event = invoice.close()?;
    let closed_at = invoice.closed_at().unwrap_or_else(Utc::now);

    uow.save_invoice_status(invoice).await?;
    uow.append(NewOutboxEvent::from_event(&event)?).await?;
    let completed = uow
        .complete_pending_print_requests(invoice.id(), closed_at)
        .await?;
    Ok(completed)
}
