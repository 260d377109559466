//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::BrokerStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: &'static str,
}

/// GET /health: 200 while the broker connection is up, 503 otherwise.
pub async fn check(
    State(broker): State<Arc<dyn BrokerStatus>>,
) -> (StatusCode, Json<HealthResponse>) {
    if broker.is_connected() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                broker: "connected",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable",
                broker: "disconnected",
            }),
        )
    }
}
