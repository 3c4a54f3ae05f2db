//! Invoice coordination for the billing service.
//!
//! - [`InvoiceService`]: invoice commands and the idempotent print request,
//!   each committed together with its outbox row.
//! - [`OutboxPublisher`]: polls the outbox and forwards pending rows to the
//!   event bus.
//! - [`InventoryEventConsumer`]: applies inventory reservation outcomes,
//!   fenced by the processed-message table.

pub mod commands;
pub mod consumer;
pub mod error;
pub mod publisher;
pub mod service;

pub use commands::{AddLineItem, CreateInvoice, NewLineItem};
pub use consumer::{InventoryEventConsumer, ReservationConfirmed, ReservationRejected};
pub use error::{BillingError, Result};
pub use publisher::{OutboxPublisher, PublishReport, PublisherConfig, outbound_message};
pub use service::{InvoiceService, PrintRequestOutcome};
