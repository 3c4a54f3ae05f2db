//! Invoice endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use billing::{AddLineItem, CreateInvoice, NewLineItem};
use chrono::{DateTime, Utc};
use domain::{Invoice, InvoiceStatus, LineItem, Money};
use messaging::EventBus;
use serde::{Deserialize, Serialize};
use store::BillingStore;

use super::parse_invoice_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateInvoiceRequest {
    pub number: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

impl From<LineItemRequest> for NewLineItem {
    fn from(req: LineItemRequest) -> Self {
        NewLineItem::new(
            req.product_id,
            req.quantity,
            Money::from_cents(req.unit_price_cents),
        )
    }
}

#[derive(Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct InvoiceResponse {
    pub id: String,
    pub number: String,
    pub customer: Option<String>,
    pub status: InvoiceStatus,
    pub items: Vec<LineItemResponse>,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Invoice> for InvoiceResponse {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id().to_string(),
            number: invoice.number().to_string(),
            customer: invoice.customer().map(String::from),
            status: invoice.status(),
            items: invoice.items().iter().map(LineItemResponse::from).collect(),
            total_cents: invoice.total().cents(),
            created_at: invoice.created_at(),
            closed_at: invoice.closed_at(),
        }
    }
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

impl From<&LineItem> for LineItemResponse {
    fn from(item: &LineItem) -> Self {
        Self {
            id: item.id.to_string(),
            product_id: item.product_id.to_string(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
            total_cents: item.total_price().cents(),
        }
    }
}

// -- Handlers --

/// POST /invoices: create an invoice with optional items.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), ApiError> {
    let cmd = CreateInvoice {
        number: req.number,
        customer: req.customer,
        items: req.items.into_iter().map(NewLineItem::from).collect(),
    };
    let invoice = state.invoices.create_invoice(cmd).await?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(&invoice))))
}

/// GET /invoices: list invoices, newest first, optionally by status.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<InvoiceResponse>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<InvoiceStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };

    let invoices = state.invoices.list_invoices(status).await?;
    Ok(Json(invoices.iter().map(InvoiceResponse::from).collect()))
}

/// GET /invoices/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let invoice = state.invoices.get_invoice(invoice_id).await?;
    Ok(Json(InvoiceResponse::from(&invoice)))
}

/// POST /invoices/{id}/items: add a line item to an open invoice.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
    Json(req): Json<LineItemRequest>,
) -> Result<(StatusCode, Json<LineItemResponse>), ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let item = state
        .invoices
        .add_line_item(AddLineItem {
            invoice_id,
            item: req.into(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(LineItemResponse::from(&item))))
}

/// POST /invoices/{id}/close
#[tracing::instrument(skip(state))]
pub async fn close<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let invoice_id = parse_invoice_id(&id)?;
    let invoice = state.invoices.close_invoice(invoice_id).await?;
    Ok(Json(InvoiceResponse::from(&invoice)))
}
