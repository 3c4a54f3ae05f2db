//! Invoice aggregate and related types.

mod aggregate;
mod events;
mod state;
mod value_objects;

pub use aggregate::Invoice;
pub use events::{
    EventItem, InvoiceClosedData, InvoiceCreatedData, InvoiceEvent, PrintRequestedData,
};
pub use state::{InvoiceStatus, UnknownInvoiceStatus};
pub use value_objects::{LineItem, Money, ProductId};

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during invoice operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceError {
    /// Invoice number is required.
    #[error("Invoice number must not be blank")]
    BlankNumber,

    /// Product reference is required.
    #[error("Product id must not be blank")]
    BlankProduct,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: i32 },

    /// Invalid unit price.
    #[error("Invalid unit price: {price} (must not be negative)")]
    NegativePrice { price: Money },

    /// A line or invoice total does not fit in the money representation.
    #[error("Amount is too large")]
    AmountOverflow,

    /// The client-supplied idempotency key is malformed.
    #[error("Invalid idempotency key: {reason}")]
    InvalidIdempotencyKey { reason: &'static str },

    /// Invoice is not in the expected state.
    #[error("Invalid state transition: cannot {action} a {status} invoice")]
    InvalidState {
        status: InvoiceStatus,
        action: &'static str,
    },

    /// Invoice has no line items.
    #[error("Invoice has no line items")]
    NoLineItems,
}

impl InvoiceError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::BlankNumber
            | InvoiceError::BlankProduct
            | InvoiceError::InvalidQuantity { .. }
            | InvoiceError::NegativePrice { .. }
            | InvoiceError::AmountOverflow
            | InvoiceError::InvalidIdempotencyKey { .. } => ErrorKind::Validation,
            InvoiceError::InvalidState { .. } => ErrorKind::InvalidState,
            InvoiceError::NoLineItems => ErrorKind::Precondition,
        }
    }
}
