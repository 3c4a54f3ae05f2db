//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use messaging::InMemoryEventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state() -> (axum::Router, InMemoryStore, InMemoryEventBus) {
    let store = InMemoryStore::new();
    let bus = InMemoryEventBus::new();
    let state = Arc::new(AppState::new(store.clone(), bus.clone(), &Config::default()));
    let app = api::create_app(state, get_metrics_handle());
    (app, store, bus)
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn post_print(invoice_id: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/invoices/{invoice_id}/print"));
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Creates "NF-001" with one item (P1, 2 x 10.00) and returns its id.
async fn create_invoice(app: &axum::Router) -> String {
    let response = app
        .clone()
        .oneshot(post_json(
            "/invoices",
            serde_json::json!({
                "number": "NF-001",
                "items": [{ "product_id": "P1", "quantity": 2, "unit_price_cents": 1000 }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "billing");
    assert_eq!(json["checks"]["database"]["status"], "healthy");
    assert_eq!(json["checks"]["message_bus"]["status"], "healthy");
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_health_check_reports_bus_outage() {
    let (app, _, bus) = setup_with_state();
    bus.set_unhealthy(true);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["checks"]["message_bus"]["status"], "unhealthy");
    assert!(json["checks"]["message_bus"]["error"].is_string());
    assert!(json["checks"]["database"].get("error").is_none());
}

#[tokio::test]
async fn test_create_and_get_invoice() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = app
        .oneshot(get(&format!("/invoices/{invoice_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let invoice = body_json(response).await;
    assert_eq!(invoice["id"], invoice_id.as_str());
    assert_eq!(invoice["number"], "NF-001");
    assert_eq!(invoice["status"], "OPEN");
    assert_eq!(invoice["total_cents"], 2000);
    assert_eq!(invoice["items"].as_array().unwrap().len(), 1);
    assert!(invoice["closed_at"].is_null());
}

#[tokio::test]
async fn test_create_invoice_with_blank_number() {
    let app = setup();

    let response = app
        .oneshot(post_json("/invoices", serde_json::json!({ "number": "  " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["kind"], "validation");
}

#[tokio::test]
async fn test_get_nonexistent_invoice() {
    let app = setup();
    let fake_id = common::InvoiceId::new();

    let response = app
        .oneshot(get(&format!("/invoices/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invoice not found");
}

#[tokio::test]
async fn test_invalid_invoice_id_format() {
    let app = setup();

    let response = app.oneshot(get("/invoices/not-a-uuid")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_item_and_close() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/items"),
            serde_json::json!({ "product_id": "P2", "quantity": 1, "unit_price_cents": 250 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["total_cents"], 250);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/close"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let invoice = body_json(response).await;
    assert_eq!(invoice["status"], "CLOSED");
    assert_eq!(invoice["total_cents"], 2250);
    assert!(invoice["closed_at"].is_string());

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/close"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/items"),
            serde_json::json!({ "product_id": "P3", "quantity": 1, "unit_price_cents": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_add_item_with_invalid_quantity() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = app
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/items"),
            serde_json::json!({ "product_id": "P2", "quantity": 0, "unit_price_cents": 100 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_invoice_with_overflowing_total() {
    let (app, store, _bus) = setup_with_state();

    let response = app
        .oneshot(post_json(
            "/invoices",
            serde_json::json!({
                "number": "NF-001",
                "items": [{ "product_id": "P1", "quantity": 2, "unit_price_cents": i64::MAX / 2 + 1 }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "validation");
    assert!(store.outbox_events().await.is_empty());
}

#[tokio::test]
async fn test_close_invoice_without_items() {
    let app = setup();
    let response = app
        .clone()
        .oneshot(post_json("/invoices", serde_json::json!({ "number": "NF-002" })))
        .await
        .unwrap();
    let invoice_id = body_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/close"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .oneshot(get(&format!("/invoices/{invoice_id}")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["status"], "OPEN");
}

#[tokio::test]
async fn test_list_invoices_by_status() {
    let app = setup();
    let closed_id = create_invoice(&app).await;
    let open_id = create_invoice(&app).await;
    app.clone()
        .oneshot(post_json(
            &format!("/invoices/{closed_id}/close"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/invoices")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

    let response = app
        .clone()
        .oneshot(get("/invoices?status=open"))
        .await
        .unwrap();
    let open = body_json(response).await;
    assert_eq!(open.as_array().unwrap().len(), 1);
    assert_eq!(open[0]["id"], open_id.as_str());

    let response = app.oneshot(get("/invoices?status=VOID")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_print_request_is_idempotent() {
    let (app, _, bus) = setup_with_state();
    let invoice_id = create_invoice(&app).await;

    let response = app
        .clone()
        .oneshot(post_print(&invoice_id, Some("abc12345")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await;
    assert_eq!(first["status"], "PENDING");
    assert_eq!(first["idempotency_key"], "abc12345");

    let response = app
        .clone()
        .oneshot(post_print(&invoice_id, Some("abc12345")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["status"], "PENDING");

    assert_eq!(bus.published_to("invoice.print-requested").len(), 1);

    let request_id = first["id"].as_str().unwrap();
    let response = app
        .oneshot(get(&format!("/print-requests/{request_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["invoice_id"], invoice_id.as_str());
}

#[tokio::test]
async fn test_print_request_requires_a_valid_key() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;

    let response = app
        .clone()
        .oneshot(post_print(&invoice_id, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_print(&invoice_id, Some("not a key")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_print_request_for_unknown_invoice() {
    let app = setup();
    let fake_id = common::InvoiceId::new().to_string();

    let response = app
        .oneshot(post_print(&fake_id, Some("k-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_nonexistent_print_request() {
    let app = setup();
    let fake_id = common::PrintRequestId::new();

    let response = app
        .oneshot(get(&format!("/print-requests/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_artifact_callback_completes_print_request() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    let response = app
        .clone()
        .oneshot(post_print(&invoice_id, Some("print-1")))
        .await
        .unwrap();
    let request_id = body_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/artifact"),
            serde_json::json!({ "url": "https://files.example/nf-001.pdf" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["updated"], 1);

    let response = app
        .oneshot(get(&format!("/print-requests/{request_id}")))
        .await
        .unwrap();
    let request = body_json(response).await;
    assert_eq!(request["status"], "DONE");
    assert_eq!(request["artifact_url"], "https://files.example/nf-001.pdf");
}

#[tokio::test]
async fn test_print_failure_callback() {
    let app = setup();
    let invoice_id = create_invoice(&app).await;
    app.clone()
        .oneshot(post_print(&invoice_id, Some("print-2")))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/invoices/{invoice_id}/print-failure"),
            serde_json::json!({ "reason": "renderer unavailable" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["updated"], 1);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let (app, store, _) = setup_with_state();
    store.set_fail_on_commit(true);

    let response = app
        .oneshot(post_json("/invoices", serde_json::json!({ "number": "NF-009" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Service temporarily unavailable");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create_invoice(&app).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("invoices_created_total"));
}
