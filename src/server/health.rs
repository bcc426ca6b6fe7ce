//! Liveness check.

use axum::http::StatusCode;

/// Returns 200 while the process is serving.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
