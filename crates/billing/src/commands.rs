//! Invoice commands.

use common::InvoiceId;
use domain::{Money, ProductId};

/// A line item to add, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Money,
}

impl NewLineItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: i32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// Command to create an invoice, optionally with initial line items.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateInvoice {
    /// Human-facing invoice number.
    pub number: String,

    pub customer: Option<String>,

    pub items: Vec<NewLineItem>,
}

impl CreateInvoice {
    /// Creates a command for an invoice with no customer and no items.
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            customer: None,
            items: Vec::new(),
        }
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    pub fn with_item(
        mut self,
        product_id: impl Into<ProductId>,
        quantity: i32,
        unit_price: Money,
    ) -> Self {
        self.items
            .push(NewLineItem::new(product_id, quantity, unit_price));
        self
    }
}

/// Command to add a line item to an open invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct AddLineItem {
    pub invoice_id: InvoiceId,
    pub item: NewLineItem,
}

impl AddLineItem {
    pub fn new(
        invoice_id: InvoiceId,
        product_id: impl Into<ProductId>,
        quantity: i32,
        unit_price: Money,
    ) -> Self {
        Self {
            invoice_id,
            item: NewLineItem::new(product_id, quantity, unit_price),
        }
    }
}
