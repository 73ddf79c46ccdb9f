//! HTTP handlers.
//!
//! Thin layer over [`ScanCoordinator`]: one scan endpoint and a health check.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use netpulse_core::{ScanCoordinator, ScanError, ScanResult};
use serde_json::json;
use std::sync::Arc;

pub fn router(coordinator: Arc<ScanCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scan/devices", post(scan_devices))
        .with_state(coordinator)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "netpulse-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Runs the scan on its own task so a dropped request cannot cancel it midway.
async fn scan_devices(
    State(coordinator): State<Arc<ScanCoordinator>>,
) -> Result<Json<ScanResult>, ApiError> {
    let result = tokio::spawn(async move { coordinator.run_scan().await })
        .await
        .map_err(|e| ScanError::Io(std::io::Error::other(format!("scan task failed: {}", e))))??;
    Ok(Json(result))
}

/// Maps scan failures onto status codes.
pub struct ApiError(ScanError);

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            ScanError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            ScanError::Busy => (StatusCode::CONFLICT, "SCAN_IN_PROGRESS"),
            ScanError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "SCAN_TIMEOUT"),
            ScanError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ScanError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            ScanError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR")
            }
        };
        let message = self.0.to_string();

        if self.0.is_admission_rejection() {
            tracing::info!(status = %status, error_code, "Scan request rejected");
        } else {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
