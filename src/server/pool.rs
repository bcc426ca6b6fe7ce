//! Read-only pool counters for monitoring.

use axum::Json;
use axum::extract::State;

use super::AppState;
use crate::ledger::PoolStats;

/// `GET /api/v1/pool`
///
/// ```ignore
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"total": 100, "claimed": 37, "unclaimed": 63}
/// ```
pub async fn pool_handler(State(app_state): State<AppState>) -> Json<PoolStats> {
    Json(app_state.allocation().ledger().stats())
}
