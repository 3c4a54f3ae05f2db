use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{InvoiceId, MessageId, OutboxEventId, PrintRequestId};
use domain::{IdempotencyKey, Invoice, InvoiceStatus, LineItem, PrintRequest};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    IDEMPOTENCY_KEY_CONSTRAINT, NewOutboxEvent, OutboxEvent, PROCESSED_MESSAGE_CONSTRAINT, Result,
    StoreError,
    store::{BillingStore, UnitOfWork},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    invoices: HashMap<InvoiceId, Invoice>,
    print_requests: HashMap<PrintRequestId, PrintRequest>,
    outbox: BTreeMap<OutboxEventId, OutboxEvent>,
    last_outbox_id: i64,
    processed: HashMap<MessageId, DateTime<Utc>>,
}

impl MemoryState {
    fn print_requests_for(&mut self, invoice_id: InvoiceId) -> impl Iterator<Item = &mut PrintRequest> {
        self.print_requests
            .values_mut()
            .filter(move |r| r.invoice_id() == invoice_id)
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_commit: AtomicBool,
    fail_on_mark_published: AtomicBool,
}

/// In-memory store implementation for testing.
///
/// A unit of work holds the store-wide lock from `begin` until it is
/// committed or dropped and works on a private copy of the data, so units
/// of work are fully serialized and a dropped one leaves no trace.
/// Pool-level reads must not be issued while the same task holds a unit
/// of work.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every commit fail with [`StoreError::Unavailable`] while set.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.faults.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes [`BillingStore::mark_published`] fail while set.
    pub fn set_fail_on_mark_published(&self, fail: bool) {
        self.faults.fail_on_mark_published.store(fail, Ordering::SeqCst);
    }

    /// Returns every outbox row in id order.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.values().cloned().collect()
    }

    /// Returns the outbox rows of one event type in id order.
    pub async fn outbox_events_of_type(&self, event_type: &str) -> Vec<OutboxEvent> {
        self.state
            .lock()
            .await
            .outbox
            .values()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Returns all print requests of an invoice, oldest first.
    pub async fn print_requests_for(&self, invoice_id: InvoiceId) -> Vec<PrintRequest> {
        let mut requests: Vec<PrintRequest> = self
            .state
            .lock()
            .await
            .print_requests
            .values()
            .filter(|r| r.invoice_id() == invoice_id)
            .cloned()
            .collect();
        requests.sort_by_key(PrintRequest::requested_at);
        requests
    }

    /// Returns the number of recorded inbound messages.
    pub async fn processed_message_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }

    /// Seeds a print request directly, bypassing the service.
    pub async fn put_print_request(&self, request: PrintRequest) {
        self.state
            .lock()
            .await
            .print_requests
            .insert(request.id(), request);
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryUnitOfWork {
            guard,
            working,
            faults: self.faults.clone(),
        })
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| status.is_none_or(|s| i.status() == s))
            .cloned()
            .collect();
        invoices.sort_by_key(|i| std::cmp::Reverse(i.created_at()));
        Ok(invoices)
    }

    async fn find_print_request(&self, id: PrintRequestId) -> Result<Option<PrintRequest>> {
        Ok(self.state.lock().await.print_requests.get(&id).cloned())
    }

    async fn find_print_request_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PrintRequest>> {
        Ok(self
            .state
            .lock()
            .await
            .print_requests
            .values()
            .find(|r| r.idempotency_key() == key)
            .cloned())
    }

    async fn drain_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        Ok(self
            .state
            .lock()
            .await
            .outbox
            .values()
            .filter(|e| !e.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: OutboxEventId, at: DateTime<Utc>) -> Result<()> {
        if self.faults.fail_on_mark_published.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mark_published disabled".into()));
        }

        let mut state = self.state.lock().await;
        if let Some(event) = state.outbox.get_mut(&id) {
            event.published_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<()> {
        self.working.invoices.insert(invoice.id(), invoice.clone());
        Ok(())
    }

    async fn lock_invoice(&mut self, id: InvoiceId) -> Result<Option<Invoice>> {
        // The store-wide guard already excludes every other unit of work.
        Ok(self.working.invoices.get(&id).cloned())
    }

    async fn save_invoice_status(&mut self, invoice: &Invoice) -> Result<()> {
        let stored = self
            .working
            .invoices
            .get_mut(&invoice.id())
            .ok_or_else(|| StoreError::Corrupt(format!("invoice {} does not exist", invoice.id())))?;

        *stored = Invoice::from_parts(
            stored.id(),
            stored.number().to_string(),
            stored.customer().map(str::to_string),
            invoice.status(),
            stored.items().to_vec(),
            stored.created_at(),
            invoice.closed_at(),
        );
        Ok(())
    }

    async fn insert_line_item(&mut self, item: &LineItem) -> Result<()> {
        let stored = self
            .working
            .invoices
            .get_mut(&item.invoice_id)
            .ok_or_else(|| StoreError::Corrupt(format!("invoice {} does not exist", item.invoice_id)))?;

        let mut items = stored.items().to_vec();
        items.push(item.clone());
        *stored = Invoice::from_parts(
            stored.id(),
            stored.number().to_string(),
            stored.customer().map(str::to_string),
            stored.status(),
            items,
            stored.created_at(),
            stored.closed_at(),
        );
        Ok(())
    }

    async fn insert_print_request(&mut self, request: &PrintRequest) -> Result<()> {
        let taken = self
            .working
            .print_requests
            .values()
            .any(|r| r.idempotency_key() == request.idempotency_key());
        if taken {
            return Err(StoreError::DuplicateKey {
                constraint: IDEMPOTENCY_KEY_CONSTRAINT.to_string(),
            });
        }

        self.working
            .print_requests
            .insert(request.id(), request.clone());
        Ok(())
    }

    async fn complete_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut moved = 0;
        for request in self.working.print_requests_for(invoice_id) {
            if request.complete(at).is_ok() {
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn fail_pending_print_requests(
        &mut self,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<u64> {
        let mut moved = 0;
        for request in self.working.print_requests_for(invoice_id) {
            if request.fail(reason).is_ok() {
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn attach_artifact(
        &mut self,
        invoice_id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut updated = 0;
        for request in self.working.print_requests_for(invoice_id) {
            if request.attach_artifact(url, at).is_ok() {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn append(&mut self, event: NewOutboxEvent) -> Result<OutboxEventId> {
        self.working.last_outbox_id += 1;
        let id = OutboxEventId::new(self.working.last_outbox_id);
        self.working.outbox.insert(
            id,
            OutboxEvent {
                id,
                event_type: event.event_type,
                aggregate_id: event.aggregate_id,
                payload: event.payload,
                occurred_at: event.occurred_at,
                published_at: None,
            },
        );
        Ok(id)
    }

    async fn is_processed(&mut self, message_id: &MessageId) -> Result<bool> {
        Ok(self.working.processed.contains_key(message_id))
    }

    async fn record_processed(
        &mut self,
        message_id: &MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.working.processed.contains_key(message_id) {
            return Err(StoreError::DuplicateKey {
                constraint: PROCESSED_MESSAGE_CONSTRAINT.to_string(),
            });
        }
        self.working.processed.insert(message_id.clone(), at);
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        if self.faults.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit disabled".into()));
        }
        *self.guard = self.working;
        Ok(())
    }
}
