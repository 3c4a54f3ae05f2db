//! Invoice aggregate implementation.

use chrono::{DateTime, Utc};
use common::InvoiceId;

use super::{
    EventItem, InvoiceClosedData, InvoiceCreatedData, InvoiceError, InvoiceEvent, InvoiceStatus,
    LineItem, Money, PrintRequestedData, ProductId,
};

/// Invoice aggregate root.
///
/// Owns its line items in insertion order. The status only ever moves
/// from OPEN to CLOSED, and a closed invoice always has at least one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    id: InvoiceId,
    number: String,
    customer: Option<String>,
    status: InvoiceStatus,
    items: Vec<LineItem>,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Opens a new invoice.
    pub fn open(number: &str, customer: Option<String>) -> Result<Self, InvoiceError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(InvoiceError::BlankNumber);
        }

        let customer = customer
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            id: InvoiceId::new(),
            number: number.to_string(),
            customer,
            status: InvoiceStatus::Open,
            items: Vec::new(),
            created_at: Utc::now(),
            closed_at: None,
        })
    }

    /// Rebuilds an invoice from persisted state without re-validating it.
    pub fn from_parts(
        id: InvoiceId,
        number: String,
        customer: Option<String>,
        status: InvoiceStatus,
        items: Vec<LineItem>,
        created_at: DateTime<Utc>,
        closed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            number,
            customer,
            status,
            items,
            created_at,
            closed_at,
        }
    }

    /// Adds a line item. Only allowed while the invoice is open.
    pub fn add_line_item(
        &mut self,
        product_id: impl Into<ProductId>,
        quantity: i32,
        unit_price: Money,
    ) -> Result<LineItem, InvoiceError> {
        if !self.status.can_add_items() {
            return Err(InvoiceError::InvalidState {
                status: self.status,
                action: "add a line item to",
            });
        }

        let item = LineItem::new(self.id, product_id, quantity, unit_price)?;
        if self.total().checked_add(item.total_price()).is_none() {
            return Err(InvoiceError::AmountOverflow);
        }
        self.items.push(item.clone());
        Ok(item)
    }

    /// Closes the invoice and returns the event to record.
    pub fn close(&mut self) -> Result<InvoiceEvent, InvoiceError> {
        if !self.status.can_close() {
            return Err(InvoiceError::InvalidState {
                status: self.status,
                action: "close",
            });
        }
        if self.items.is_empty() {
            return Err(InvoiceError::NoLineItems);
        }

        self.status = InvoiceStatus::Closed;
        self.closed_at = Some(Utc::now());

        Ok(InvoiceEvent::Closed(InvoiceClosedData {
            invoice_id: self.id,
        }))
    }

    /// Checks that a print request may be accepted for this invoice.
    pub fn ensure_printable(&self) -> Result<(), InvoiceError> {
        if !self.status.can_request_print() {
            return Err(InvoiceError::InvalidState {
                status: self.status,
                action: "print",
            });
        }
        if self.items.is_empty() {
            return Err(InvoiceError::NoLineItems);
        }
        Ok(())
    }

    /// Returns the `invoice.created` event describing the current state.
    pub fn created_event(&self) -> InvoiceEvent {
        InvoiceEvent::Created(InvoiceCreatedData {
            invoice_id: self.id,
            number: self.number.clone(),
            customer: self.customer.clone(),
            items: self.event_items(),
        })
    }

    /// Returns the `invoice.print-requested` event for the current items.
    pub fn print_requested_event(&self) -> InvoiceEvent {
        InvoiceEvent::PrintRequested(PrintRequestedData {
            invoice_id: self.id,
            items: self.event_items(),
        })
    }

    fn event_items(&self) -> Vec<EventItem> {
        self.items.iter().map(EventItem::from).collect()
    }

    // Query methods

    pub fn id(&self) -> InvoiceId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn customer(&self) -> Option<&str> {
        self.customer.as_deref()
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == InvoiceStatus::Open
    }

    /// Returns the line items in insertion order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the sum of all line totals.
    pub fn total(&self) -> Money {
        self.items.iter().map(LineItem::total_price).sum()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DomainEvent;

    fn open_invoice() -> Invoice {
        Invoice::open("NF-001", None).unwrap()
    }

    #[test]
    fn test_open_invoice() {
        let invoice = Invoice::open("  NF-001 ", Some("ACME".to_string())).unwrap();
        assert_eq!(invoice.number(), "NF-001");
        assert_eq!(invoice.customer(), Some("ACME"));
        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert!(invoice.items().is_empty());
        assert!(invoice.closed_at().is_none());
    }

    #[test]
    fn test_open_rejects_blank_number() {
        assert_eq!(Invoice::open("   ", None), Err(InvoiceError::BlankNumber));
    }

    #[test]
    fn test_blank_customer_is_dropped() {
        let invoice = Invoice::open("NF-001", Some(" ".to_string())).unwrap();
        assert_eq!(invoice.customer(), None);
    }

    #[test]
    fn test_add_line_item() {
        let mut invoice = open_invoice();
        let item = invoice
            .add_line_item("P1", 2, Money::from_cents(1000))
            .unwrap();

        assert_eq!(item.invoice_id, invoice.id());
        assert_eq!(invoice.item_count(), 1);
        assert_eq!(invoice.total(), Money::from_cents(2000));
    }

    #[test]
    fn test_items_keep_insertion_order() {
        let mut invoice = open_invoice();
        invoice.add_line_item("B", 1, Money::zero()).unwrap();
        invoice.add_line_item("A", 1, Money::zero()).unwrap();

        let products: Vec<&str> = invoice.items().iter().map(|i| i.product_id.as_str()).collect();
        assert_eq!(products, vec!["B", "A"]);
    }

    #[test]
    fn test_invalid_line_item_leaves_invoice_unchanged() {
        let mut invoice = open_invoice();
        assert!(invoice.add_line_item("P1", 0, Money::zero()).is_err());
        assert!(invoice.add_line_item("P1", 1, Money::from_cents(-5)).is_err());
        assert_eq!(invoice.item_count(), 0);
    }

    #[test]
    fn test_close() {
        let mut invoice = open_invoice();
        invoice.add_line_item("P1", 1, Money::from_cents(500)).unwrap();

        let event = invoice.close().unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Closed);
        assert!(invoice.closed_at().is_some());
        assert_eq!(event.event_type(), "invoice.closed");
        assert_eq!(event.aggregate_id(), invoice.id());
    }

    #[test]
    fn test_close_without_items_fails_and_stays_open() {
        let mut invoice = open_invoice();
        assert_eq!(invoice.close(), Err(InvoiceError::NoLineItems));
        assert_eq!(invoice.status(), InvoiceStatus::Open);
        assert!(invoice.closed_at().is_none());
    }

    #[test]
    fn test_close_twice_fails_and_stays_closed() {
        let mut invoice = open_invoice();
        invoice.add_line_item("P1", 1, Money::zero()).unwrap();
        invoice.close().unwrap();
        let closed_at = invoice.closed_at();

        let err = invoice.close().unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidState { .. }));
        assert_eq!(invoice.status(), InvoiceStatus::Closed);
        assert_eq!(invoice.closed_at(), closed_at);
    }

    #[test]
    fn test_cannot_add_items_after_close() {
        let mut invoice = open_invoice();
        invoice.add_line_item("P1", 1, Money::zero()).unwrap();
        invoice.close().unwrap();

        let err = invoice.add_line_item("P2", 1, Money::zero()).unwrap_err();
        assert!(matches!(
            err,
            InvoiceError::InvalidState {
                status: InvoiceStatus::Closed,
                ..
            }
        ));
        assert_eq!(invoice.item_count(), 1);
    }

    #[test]
    fn test_close_succeeds_iff_open_with_items() {
        for (close_first, items) in [(false, 0), (false, 1), (false, 3), (true, 1)] {
            let mut invoice = open_invoice();
            for n in 0..items {
                invoice.add_line_item(format!("P{n}"), 1, Money::zero()).unwrap();
            }
            if close_first {
                invoice.close().unwrap();
            }

            let result = invoice.close();
            assert_eq!(result.is_ok(), !close_first && items >= 1);
            assert_eq!(
                invoice.status(),
                if close_first || items >= 1 {
                    InvoiceStatus::Closed
                } else {
                    InvoiceStatus::Open
                }
            );
        }
    }

    #[test]
    fn test_ensure_printable() {
        let mut invoice = open_invoice();
        assert_eq!(invoice.ensure_printable(), Err(InvoiceError::NoLineItems));

        invoice.add_line_item("P1", 1, Money::zero()).unwrap();
        assert_eq!(invoice.ensure_printable(), Ok(()));

        invoice.close().unwrap();
        assert!(matches!(
            invoice.ensure_printable(),
            Err(InvoiceError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_print_requested_event_lists_items() {
        let mut invoice = open_invoice();
        invoice.add_line_item("P1", 2, Money::from_cents(1000)).unwrap();

        match invoice.print_requested_event() {
            InvoiceEvent::PrintRequested(data) => {
                assert_eq!(data.invoice_id, invoice.id());
                assert_eq!(data.items.len(), 1);
                assert_eq!(data.items[0].quantity, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_add_line_item_rejects_overflowing_invoice_total() {
        let mut invoice = open_invoice();
        let half = Money::from_cents(i64::MAX / 2 + 1);
        invoice.add_line_item("P1", 1, half).unwrap();

        let err = invoice.add_line_item("P2", 1, half).unwrap_err();
        assert_eq!(err, InvoiceError::AmountOverflow);
        assert_eq!(invoice.item_count(), 1);
        assert_eq!(invoice.total(), half);
    }
}
