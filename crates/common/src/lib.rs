//! Identifier types shared by every layer of the billing service.

pub mod types;

pub use types::{InvoiceId, LineItemId, MessageId, OutboxEventId, PrintRequestId};
