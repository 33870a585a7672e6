use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let profiles: Vec<Value> = state
        .bay
        .catalog
        .list()
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "capabilities": p.capabilities(),
                "idle_timeout_secs": p.idle_timeout_secs,
                "containers": p.containers.iter().map(|c| json!({
                    "name": c.name,
                    "image": c.image,
                    "role": c.role,
                    "runtime": c.runtime_kind,
                    "capabilities": c.capabilities,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(Json(json!(profiles)))
}
