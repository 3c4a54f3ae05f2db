//! Health check endpoint.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use messaging::EventBus;
use serde::Serialize;
use store::BillingStore;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: DependencyHealth,
    pub message_bus: DependencyHealth,
}

#[derive(Serialize)]
pub struct DependencyHealth {
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs one dependency probe, bounded by `timeout`.
async fn probe<F, E>(timeout: Duration, check: F) -> DependencyHealth
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let started = Instant::now();
    let error = match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {}ms", timeout.as_millis())),
    };

    DependencyHealth {
        status: if error.is_none() { "healthy" } else { "unhealthy" },
        latency_ms: millis(started.elapsed()),
        error,
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// GET /health: probes the database and the message bus.
///
/// Answers 503 when either dependency is unhealthy.
pub async fn check<S: BillingStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (database, message_bus) = tokio::join!(
        probe(state.health_timeout, state.invoices.store().ping()),
        probe(state.health_timeout, state.invoices.bus().health_check()),
    );

    let healthy = database.is_healthy() && message_bus.is_healthy();
    if !healthy {
        tracing::warn!(
            database = database.status,
            message_bus = message_bus.status,
            "health check failed"
        );
    }

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        service: state.service_name.clone(),
        timestamp: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        checks: HealthChecks {
            database,
            message_bus,
        },
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_saturates_instead_of_truncating() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn probe_reports_failure_and_timeout() {
        let failed = probe(Duration::from_secs(1), async { Err::<(), _>("refused") }).await;
        assert!(!failed.is_healthy());
        assert_eq!(failed.error.as_deref(), Some("refused"));

        let slow = probe(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), String>(())
        })
        .await;
        assert!(!slow.is_healthy());
        assert_eq!(slow.error.as_deref(), Some("timed out after 1ms"));
    }
}
