//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use billing::BillingError;
use domain::ErrorKind;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client, rejected before reaching the service.
    BadRequest(String),
    /// Error returned by a billing operation.
    Billing(BillingError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Billing(err) => err.kind(),
        }
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Precondition => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientInfra => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Billing(err) if kind == ErrorKind::TransientInfra => {
                tracing::error!(error = %err, "dependency failure");
                "Service temporarily unavailable".to_string()
            }
            ApiError::Billing(err) => err.to_string(),
        };

        let body = serde_json::json!({ "error": message, "kind": kind.as_str() });
        (status_for(kind), axum::Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError::Billing(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::InvoiceError;
    use store::StoreError;

    #[test]
    fn statuses_follow_the_error_kind() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InvalidState), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::Precondition),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::TransientInfra),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn infra_errors_hide_details() {
        let err = ApiError::from(BillingError::from(StoreError::Unavailable(
            "pool timed out on 10.0.0.3".to_string(),
        )));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn domain_errors_keep_their_message() {
        let err = ApiError::from(BillingError::from(InvoiceError::NoLineItems));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(
            err.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
