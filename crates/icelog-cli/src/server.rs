//! Admin HTTP server: liveness, readiness, buffer statistics, force flush.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use icelog_core::coordinator::PartitionCoordinator;
use icelog_core::health::HealthStatus;
use icelog_core::metrics::MetricsSnapshot;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Payload of `GET /stats`.
#[derive(Debug, Serialize)]
struct StatsResponse {
    total_buffer_size_bytes: usize,
    total_buffer_records: usize,
    is_running: bool,
    #[serde(flatten)]
    counters: MetricsSnapshot,
}

/// Serve the admin endpoints until the process exits.
pub async fn serve(coordinator: Arc<PartitionCoordinator>, port: u16) {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/stats", get(stats_handler))
        .route("/flush", post(flush_handler))
        .with_state(coordinator);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind admin server");
            return;
        }
    };

    info!(port, "Admin server started");

    if let Err(e) = axum::serve(listener, router).await {
        error!(error = %e, "Admin server error");
    }
}

/// Liveness probe.
async fn health_handler(State(coordinator): State<Arc<PartitionCoordinator>>) -> impl IntoResponse {
    match coordinator.health().overall_status() {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

/// Readiness probe: true once the Iceberg catalog attach succeeded.
async fn ready_handler(State(coordinator): State<Arc<PartitionCoordinator>>) -> impl IntoResponse {
    if coordinator.health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Aggregate buffer statistics plus process counters.
async fn stats_handler(State(coordinator): State<Arc<PartitionCoordinator>>) -> impl IntoResponse {
    Json(StatsResponse {
        total_buffer_size_bytes: coordinator.total_buffer_size(),
        total_buffer_records: coordinator.total_buffer_record_count(),
        is_running: coordinator.is_running(),
        counters: coordinator.metrics().snapshot(),
    })
}

/// Force flush every partition to Iceberg and commit offsets.
async fn flush_handler(State(coordinator): State<Arc<PartitionCoordinator>>) -> impl IntoResponse {
    info!("Force flush requested via admin endpoint");
    if coordinator.force_flush_all().await {
        (StatusCode::OK, "Flush completed (offsets committed)")
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Flush failed (some partitions did not drain)",
        )
    }
}
