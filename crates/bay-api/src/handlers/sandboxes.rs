use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use bay_domain::{CargoId, Owner, ProfileId, SandboxId};
use bay_orchestrator::CreateSandboxParams;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::{sandbox_json, with_idempotency};
use crate::state::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSandboxBody {
    pub profile: String,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub cargo_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    headers: HeaderMap,
    Json(body): Json<CreateSandboxBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body_value = serde_json::to_value(&body)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let (status, value) = with_idempotency(
        &state,
        &owner,
        "POST /v1/sandboxes".to_string(),
        &headers,
        &body_value,
        || async {
            let now = Utc::now();
            let params = CreateSandboxParams {
                profile_id: ProfileId::new(&body.profile),
                ttl_seconds: body.ttl_seconds,
                cargo_id: body.cargo_id.as_deref().map(CargoId::new),
            };
            let (record, status) = state.bay.sandboxes.create(&owner, params, now).await?;
            Ok((StatusCode::CREATED, sandbox_json(&record, status)))
        },
    )
    .await?;
    Ok((status, Json(value)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> Result<Json<Value>, ApiError> {
    let now = Utc::now();
    let sandboxes: Vec<Value> = state
        .bay
        .sandboxes
        .list(&owner, now)
        .await?
        .iter()
        .map(|(record, status)| sandbox_json(record, *status))
        .collect();
    Ok(Json(json!(sandboxes)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (record, status) = state
        .bay
        .sandboxes
        .get(&owner, &SandboxId::new(id), Utc::now())
        .await?;
    Ok(Json(sandbox_json(&record, status)))
}

pub async fn keepalive(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (record, status) = state
        .bay
        .sandboxes
        .keepalive(&owner, &SandboxId::new(id), Utc::now())
        .await?;
    Ok(Json(sandbox_json(&record, status)))
}

#[derive(Debug, Deserialize)]
pub struct ExtendTtlBody {
    pub ttl_seconds: u64,
}

pub async fn extend_ttl(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<ExtendTtlBody>,
) -> Result<Json<Value>, ApiError> {
    let (record, status) = state
        .bay
        .sandboxes
        .extend_ttl(&owner, &SandboxId::new(id), body.ttl_seconds, Utc::now())
        .await?;
    Ok(Json(sandbox_json(&record, status)))
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (record, status) = state
        .bay
        .sandboxes
        .stop(&owner, &SandboxId::new(id), Utc::now())
        .await?;
    Ok(Json(sandbox_json(&record, status)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.bay.sandboxes.delete(&owner, &SandboxId::new(id), Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}
