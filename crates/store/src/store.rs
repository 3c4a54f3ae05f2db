use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{InvoiceId, MessageId, OutboxEventId, PrintRequestId};
use domain::{IdempotencyKey, Invoice, InvoiceStatus, LineItem, PrintRequest};

use crate::{NewOutboxEvent, OutboxEvent, Result};

/// Entry point to the billing store.
///
/// Reads outside of a transaction and the outbox publication bookkeeping
/// live here. Every business write goes through a [`UnitOfWork`] obtained
/// from [`BillingStore::begin`].
#[async_trait]
pub trait BillingStore: Send + Sync + Clone + 'static {
    /// The transaction type of this store.
    type UnitOfWork: UnitOfWork;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::UnitOfWork>;

    /// Loads an invoice with its line items.
    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>>;

    /// Lists invoices, newest first, optionally filtered by status.
    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>>;

    async fn find_print_request(&self, id: PrintRequestId) -> Result<Option<PrintRequest>>;

    /// Looks up the print request created for an idempotency key.
    async fn find_print_request_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PrintRequest>>;

    /// Returns the oldest unpublished outbox rows, ordered by id, at most `limit`.
    async fn drain_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Stamps an outbox row as published.
    ///
    /// Runs in its own transaction, independent of the write that created
    /// the row. A row that is already published keeps its first timestamp.
    async fn mark_published(&self, id: OutboxEventId, at: DateTime<Utc>) -> Result<()>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// A single local transaction.
///
/// Nothing is visible to other transactions until [`UnitOfWork::commit`].
/// Dropping a unit of work without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Inserts a new invoice together with its line items.
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()>;

    /// Loads an invoice and takes an exclusive lock on its row until the
    /// transaction ends.
    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>>;

    /// Persists the status and closed timestamp of an invoice.
    async fn save_invoice_status(&mut self, invoice: &Invoice) -> Result<()>;

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()>;

    /// Inserts a print request.
    ///
    /// Fails with [`crate::StoreError::DuplicateKey`] if the idempotency key
    /// is taken. The transaction cannot be used afterwards.
    async fn insert_print_request(&mut self, request: &PrintRequest) -> Result<()>;

    /// Moves the pending print requests of an invoice to DONE. Returns how many moved.
    async fn complete_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Moves the pending print requests of an invoice to FAILED. Returns how many moved.
    async fn fail_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<u64>;

    /// Attaches a rendered artifact to every eligible print request of an invoice.
    async fn attach_artifact(
        &mut self,
        invoice_id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Appends an event to the outbox as part of this transaction.
    async fn append(&mut self, event: NewOutboxEvent) -> Result<OutboxEventId>;

    /// Returns true if the inbound message was already applied.
    async fn is_processed(&mut self, message_id: &MessageId) -> Result<bool>;

    /// Records the inbound message as applied.
    async fn record_processed(&mut self, message_id: &MessageId, at: DateTime<Utc>)
    -> Result<()>;

    /// Commits the transaction.
    async fn commit(self) -> Result<()>;
}
