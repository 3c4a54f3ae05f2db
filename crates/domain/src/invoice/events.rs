//! Outbound invoice events.
//!
//! Payloads use camelCase field names on the wire.

use common::InvoiceId;
use serde::{Deserialize, Serialize};

use crate::event::{DomainEvent, topics};

use super::{LineItem, ProductId};

/// Events published about an invoice.
///
/// Serializes to the bare payload of the variant; the variant itself
/// travels as the event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvoiceEvent {
    /// Invoice was created.
    Created(InvoiceCreatedData),

    /// Invoice was closed.
    Closed(InvoiceClosedData),

    /// Printing was requested for the invoice.
    PrintRequested(PrintRequestedData),
}

impl DomainEvent for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::Created(_) => topics::INVOICE_CREATED,
            InvoiceEvent::Closed(_) => topics::INVOICE_CLOSED,
            InvoiceEvent::PrintRequested(_) => topics::PRINT_REQUESTED,
        }
    }

    fn aggregate_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::Created(data) => data.invoice_id,
            InvoiceEvent::Closed(data) => data.invoice_id,
            InvoiceEvent::PrintRequested(data) => data.invoice_id,
        }
    }
}

/// Product and quantity pair carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventItem {
    pub product_id: ProductId,
    pub quantity: i32,
}

impl From<&LineItem> for EventItem {
    fn from(item: &LineItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
        }
    }
}

/// Data for the `invoice.created` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCreatedData {
    pub invoice_id: InvoiceId,
    pub number: String,
    pub customer: Option<String>,
    pub items: Vec<EventItem>,
}

/// Data for the `invoice.closed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceClosedData {
    pub invoice_id: InvoiceId,
}

/// Data for the `invoice.print-requested` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRequestedData {
    pub invoice_id: InvoiceId,
    pub items: Vec<EventItem>,
}
