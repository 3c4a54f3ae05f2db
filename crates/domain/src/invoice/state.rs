//! Invoice state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The state of an invoice in its lifecycle.
///
/// State transitions:
/// ```text
/// Open ──► Closed
/// ```
/// There is no way back: a closed invoice stays closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Invoice accepts line items and can be closed.
    #[default]
    Open,

    /// Invoice was finalized (terminal state).
    Closed,
}

impl InvoiceStatus {
    /// Returns true if line items can be added in this state.
    pub fn can_add_items(&self) -> bool {
        matches!(self, InvoiceStatus::Open)
    }

    /// Returns true if the invoice can be closed in this state.
    pub fn can_close(&self) -> bool {
        matches!(self, InvoiceStatus::Open)
    }

    /// Returns true if a print request can be accepted in this state.
    pub fn can_request_print(&self) -> bool {
        matches!(self, InvoiceStatus::Open)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Closed)
    }

    /// Returns the persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "OPEN",
            InvoiceStatus::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown invoice status: {0}")]
pub struct UnknownInvoiceStatus(pub String);

impl std::str::FromStr for InvoiceStatus {
    type Err = UnknownInvoiceStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(InvoiceStatus::Open),
            "CLOSED" => Ok(InvoiceStatus::Closed),
            _ => Err(UnknownInvoiceStatus(s.to_string())),
        }
    }
}
