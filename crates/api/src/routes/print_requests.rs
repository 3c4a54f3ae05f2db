//! Print request endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use billing::PrintRequestOutcome;
use chrono::{DateTime, Utc};
use domain::{PrintRequest, PrintRequestStatus};
use messaging::EventBus;
use serde::{Deserialize, Serialize};
use store::BillingStore;

use super::{parse_invoice_id, parse_print_request_id};
use crate::AppState;
use crate::error::ApiError;

/// Header carrying the client-chosen idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Serialize)]
pub struct PrintRequestResponse {
    pub id: String,
    pub invoice_id: String,
    pub status: PrintRequestStatus,
    pub idempotency_key: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub artifact_url: Option<String>,
}

impl From<&PrintRequest> for PrintRequestResponse {
    fn from(request: &PrintRequest) -> Self {
        Self {
            id: request.id().to_string(),
            invoice_id: request.invoice_id().to_string(),
            status: request.status(),
            idempotency_key: request.idempotency_key().to_string(),
            requested_at: request.requested_at(),
            completed_at: request.completed_at(),
            error_message: request.error_message().map(String::from),
            artifact_url: request.artifact_url().map(String::from),
        }
    }
}

#[derive(Deserialize)]
pub struct ArtifactRequest {
    pub url: String,
}

#[derive(Deserialize)]
pub struct PrintFailureRequest {
    pub reason: String,
}

/// Number of print requests changed by a callback.
#[derive(Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

/// POST /invoices/{id}/print: request a print, idempotent per key.
///
/// Answers 201 for a new request and 200 when the key was seen before.
#[tracing::instrument(skip(state, headers))]
pub async fn request<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PrintRequestResponse>), ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| ApiError::BadRequest("Idempotency-Key header is required".to_string()))?
        .to_str()
        .map_err(|_| ApiError::BadRequest("Idempotency-Key header is not valid text".to_string()))?;

    let outcome = state.invoices.request_print(invoice_id, key).await?;
    let status = match outcome {
        PrintRequestOutcome::Created(_) => StatusCode::CREATED,
        PrintRequestOutcome::Replayed(_) => StatusCode::OK,
    };

    Ok((status, Json(PrintRequestResponse::from(outcome.request()))))
}

/// GET /print-requests/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<PrintRequestResponse>, ApiError> {
    let request_id = parse_print_request_id(&id)?;
    let request = state.invoices.get_print_request(request_id).await?;
    Ok(Json(PrintRequestResponse::from(&request)))
}

/// POST /invoices/{id}/artifact: the renderer reports a finished document.
#[tracing::instrument(skip(state, req))]
pub async fn record_artifact<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
    Json(req): Json<ArtifactRequest>,
) -> Result<Json<UpdatedResponse>, ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let updated = state.invoices.record_artifact(invoice_id, &req.url).await?;
    Ok(Json(UpdatedResponse { updated }))
}

/// POST /invoices/{id}/print-failure: the renderer gave up.
#[tracing::instrument(skip(state, req))]
pub async fn fail<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
    Json(req): Json<PrintFailureRequest>,
) -> Result<Json<UpdatedResponse>, ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let updated = state.invoices.fail_print(invoice_id, &req.reason).await?;
    Ok(Json(UpdatedResponse { updated }))
}
