use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use bay_domain::{CargoId, Owner};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::{cargo_json, with_idempotency};
use crate::state::AppState;

/// Creates a shared external cargo. Managed cargos are created implicitly
/// with their sandbox.
pub async fn create(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (status, value) = with_idempotency(
        &state,
        &owner,
        "POST /v1/cargos".to_string(),
        &headers,
        &json!({}),
        || async {
            let cargo = state.bay.cargos.create_external(&owner, Utc::now()).await?;
            Ok((StatusCode::CREATED, cargo_json(&cargo)))
        },
    )
    .await?;
    Ok((status, Json(value)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> Result<Json<Value>, ApiError> {
    let cargos: Vec<Value> =
        state.bay.cargos.list(&owner).await?.iter().map(cargo_json).collect();
    Ok(Json(json!(cargos)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cargo = state.bay.cargos.get(&owner, &CargoId::new(id)).await?;
    Ok(Json(cargo_json(&cargo)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.bay.cargos.delete(&owner, &CargoId::new(id), Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
