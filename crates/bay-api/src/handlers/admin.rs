use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// Liveness. Public: load balancers probe it without credentials.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Run every GC task once, immediately.
pub async fn trigger_gc(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.bay.gc.run_all_once().await;
    Ok(Json(json!({ "status": "completed" })))
}
