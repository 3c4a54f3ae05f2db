//! HTTP API server for the billing service.
//!
//! Provides REST endpoints for invoices and print requests, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use billing::InvoiceService;
use messaging::EventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use store::BillingStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: BillingStore, B: EventBus> {
    pub invoices: InvoiceService<S, B>,
    /// Name reported by the health check.
    pub service_name: String,
    pub health_timeout: Duration,
    pub started_at: Instant,
}

impl<S: BillingStore, B: EventBus> AppState<S, B> {
    pub fn new(store: S, bus: B, config: &Config) -> Self {
        Self {
            invoices: InvoiceService::new(store, bus).with_source(config.event_source.clone()),
            service_name: config.event_source.clone(),
            health_timeout: config.health_timeout,
            started_at: Instant::now(),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BillingStore, B: EventBus>(
    state: Arc<AppState<S, B>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S, B>))
        .route(
            "/invoices",
            post(routes::invoices::create::<S, B>).get(routes::invoices::list::<S, B>),
        )
        .route("/invoices/{id}", get(routes::invoices::get::<S, B>))
        .route(
            "/invoices/{id}/items",
            post(routes::invoices::add_item::<S, B>),
        )
        .route("/invoices/{id}/close", post(routes::invoices::close::<S, B>))
        .route(
            "/invoices/{id}/print",
            post(routes::print_requests::request::<S, B>),
        )
        .route(
            "/invoices/{id}/artifact",
            post(routes::print_requests::record_artifact::<S, B>),
        )
        .route(
            "/invoices/{id}/print-failure",
            post(routes::print_requests::fail::<S, B>),
        )
        .route(
            "/print-requests/{id}",
            get(routes::print_requests::get::<S, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
