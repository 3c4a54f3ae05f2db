pub mod health;
pub mod invoices;
pub mod metrics;
pub mod print_requests;

use common::{InvoiceId, PrintRequestId};

use crate::error::ApiError;

pub(crate) fn parse_invoice_id(id: &str) -> Result<InvoiceId, ApiError> {
    InvoiceId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid invoice id: {e}")))
}

pub(crate) fn parse_print_request_id(id: &str) -> Result<PrintRequestId, ApiError> {
    PrintRequestId::parse(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid print request id: {e}")))
}
