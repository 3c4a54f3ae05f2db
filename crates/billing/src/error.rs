//! Billing error types.

use domain::{ErrorKind, InvoiceError, PrintRequestError};
use messaging::BusError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by billing operations.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Invoice(#[from] InvoiceError),

    #[error(transparent)]
    PrintRequest(#[from] PrintRequestError),

    /// The referenced entity does not exist.
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    /// A required input was blank.
    #[error("{field} must not be blank")]
    BlankField { field: &'static str },

    /// An inbound message body could not be decoded.
    #[error("Invalid message payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BillingError {
    pub(crate) fn invoice_not_found(id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: "Invoice",
            id: id.to_string(),
        }
    }

    pub(crate) fn print_request_not_found(id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: "Print request",
            id: id.to_string(),
        }
    }

    /// Classifies the error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Invoice(e) => e.kind(),
            BillingError::PrintRequest(e) => e.kind(),
            BillingError::NotFound { .. } => ErrorKind::NotFound,
            BillingError::BlankField { .. } | BillingError::Payload(_) => ErrorKind::Validation,
            BillingError::Store(e) => e.kind(),
            BillingError::Bus(_) | BillingError::Serialization(_) => ErrorKind::TransientInfra,
        }
    }
}

/// Convenience type alias for billing results.
pub type Result<T> = std::result::Result<T, BillingError>;
