//! Integration tests for the invoice and print request lifecycle.

use chrono::Utc;
use domain::{
    DomainEvent, ErrorKind, IdempotencyKey, Invoice, InvoiceError, InvoiceStatus, Money,
    PrintRequest, PrintRequestStatus, topics,
};

fn invoice_with_items() -> Invoice {
    let mut invoice = Invoice::open("NF-001", Some("ACME".to_string())).unwrap();
    invoice
        .add_line_item("P1", 2, Money::from_cents(1000))
        .unwrap();
    invoice
        .add_line_item("P2", 1, Money::from_cents(250))
        .unwrap();
    invoice
}

#[test]
fn full_lifecycle() {
    let mut invoice = invoice_with_items();
    assert_eq!(invoice.total(), Money::from_cents(2250));
    invoice.ensure_printable().unwrap();

    let print = invoice.print_requested_event();
    assert_eq!(print.event_type(), topics::PRINT_REQUESTED);
    let payload = print.to_payload().unwrap();
    assert_eq!(payload["items"].as_array().unwrap().len(), 2);
    assert_eq!(payload["items"][1]["productId"], "P2");

    let closed = invoice.close().unwrap();
    assert_eq!(closed.event_type(), topics::INVOICE_CLOSED);
    assert_eq!(closed.aggregate_id(), invoice.id());
    assert_eq!(invoice.status(), InvoiceStatus::Closed);
    assert!(invoice.closed_at().is_some());
}

#[test]
fn closed_invoice_rejects_every_mutation() {
    let mut invoice = invoice_with_items();
    invoice.close().unwrap();

    let err = invoice
        .add_line_item("P3", 1, Money::zero())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(invoice.close().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(
        invoice.ensure_printable().unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(invoice.item_count(), 2);
}

#[test]
fn empty_invoice_cannot_close_or_print() {
    let mut invoice = Invoice::open("NF-002", None).unwrap();

    assert_eq!(invoice.close().unwrap_err(), InvoiceError::NoLineItems);
    assert_eq!(
        invoice.ensure_printable().unwrap_err(),
        InvoiceError::NoLineItems
    );
    assert!(invoice.is_open());
}

#[test]
fn print_request_settles_once() {
    let invoice = invoice_with_items();
    let key = IdempotencyKey::parse("abc12345").unwrap();
    let mut request = PrintRequest::pending(invoice.id(), key);

    request.complete(Utc::now()).unwrap();
    assert_eq!(request.status(), PrintRequestStatus::Done);
    assert!(request.fail("late").is_err());

    request
        .attach_artifact("https://files.example/nf-001.pdf", Utc::now())
        .unwrap();
    assert!(!request.accepts_artifact());
    assert!(
        request
            .attach_artifact("https://files.example/other.pdf", Utc::now())
            .is_err()
    );
}

#[test]
fn failed_print_request_refuses_artifacts() {
    let invoice = invoice_with_items();
    let mut request =
        PrintRequest::pending(invoice.id(), IdempotencyKey::parse("key_2").unwrap());

    request.fail("insufficient stock").unwrap();

    assert_eq!(request.error_message(), Some("insufficient stock"));
    assert!(request.completed_at().is_none());
    assert!(
        request
            .attach_artifact("https://files.example/x.pdf", Utc::now())
            .is_err()
    );
}
