//! Domain event trait and topic names.

use common::InvoiceId;
use serde::Serialize;

/// Routing keys of the events this service publishes and consumes.
pub mod topics {
    /// Published when an invoice is created.
    pub const INVOICE_CREATED: &str = "invoice.created";
    /// Published when an invoice moves to CLOSED.
    pub const INVOICE_CLOSED: &str = "invoice.closed";
    /// Published when a print request is accepted.
    pub const PRINT_REQUESTED: &str = "invoice.print-requested";

    /// Consumed: the inventory service reserved stock for an invoice.
    pub const RESERVATION_CONFIRMED: &str = "inventory.reservation-confirmed";
    /// Consumed: the inventory service could not reserve stock.
    pub const RESERVATION_REJECTED: &str = "inventory.reservation-rejected";
}

/// Trait for domain events.
///
/// Domain events are facts that already happened. They are written to the
/// outbox in the same transaction as the state change that produced them.
pub trait DomainEvent: Serialize + Send + Sync + Clone {
    /// Returns the event type, which is also the routing key on the bus.
    fn event_type(&self) -> &'static str;

    /// Returns the invoice the event belongs to.
    fn aggregate_id(&self) -> InvoiceId;

    /// Serializes the event body as stored in the outbox.
    fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
