//! Domain layer for the billing service.
//!
//! This crate provides:
//! - the Invoice aggregate with its OPEN → CLOSED state machine
//! - print requests and the idempotency key that deduplicates them
//! - outbound event payloads and the topic names they travel under
//! - the error taxonomy shared by every layer above
//!
//! Nothing in here performs I/O.

pub mod error;
pub mod event;
pub mod invoice;
pub mod print;

pub use common::{InvoiceId, LineItemId, PrintRequestId};
pub use error::ErrorKind;
pub use event::{DomainEvent, topics};
pub use invoice::{
    EventItem, Invoice, InvoiceClosedData, InvoiceCreatedData, InvoiceError, InvoiceEvent,
    InvoiceStatus, LineItem, Money, PrintRequestedData, ProductId, UnknownInvoiceStatus,
};
pub use print::{
    IdempotencyKey, PrintRequest, PrintRequestError, PrintRequestStatus, UnknownPrintRequestStatus,
};
