//! Inventory event payloads.

use common::InvoiceId;
use domain::{EventItem, ProductId};
use serde::Deserialize;

use crate::error::{BillingError, Result};

/// Body of `inventory.reservation-confirmed`.
///
/// Producers either send an `items` array or, in the older form, a single
/// `productId` and `quantity` at the top level. The older form counts as one
/// item whenever `productId` is non-blank; a missing `quantity` reads as 0.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationConfirmed {
    pub invoice_id: InvoiceId,
    #[serde(default)]
    items: Vec<EventItem>,
    #[serde(default)]
    product_id: Option<ProductId>,
    #[serde(default)]
    quantity: Option<i32>,
}

impl ReservationConfirmed {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(BillingError::Payload)
    }

    /// Reserved items, whichever form the producer used.
    pub fn items(&self) -> Vec<EventItem> {
        if !self.items.is_empty() {
            return self.items.clone();
        }
        match &self.product_id {
            Some(product_id) if !product_id.as_str().trim().is_empty() => vec![EventItem {
                product_id: product_id.clone(),
                quantity: self.quantity.unwrap_or(0),
            }],
            _ => Vec::new(),
        }
    }
}

/// Body of `inventory.reservation-rejected`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRejected {
    pub invoice_id: InvoiceId,
    #[serde(default)]
    reason: Option<String>,
}

impl ReservationRejected {
    pub const DEFAULT_REASON: &'static str = "inventory reservation rejected";

    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(BillingError::Payload)
    }

    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(Self::DEFAULT_REASON)
    }
}
