use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::Engine as _;
use chrono::Utc;
use bay_domain::{Owner, SandboxId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::with_idempotency;
use crate::state::AppState;

// ── Code execution ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PythonBody {
    pub code: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn exec_python(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<PythonBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .bay
        .router
        .exec_python(&owner, &SandboxId::new(id), &body.code, body.timeout_ms, Utc::now())
        .await?;
    Ok(Json(json!(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct ShellBody {
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn exec_shell(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<ShellBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .bay
        .router
        .exec_shell(&owner, &SandboxId::new(id), &body.command, body.timeout_ms, Utc::now())
        .await?;
    Ok(Json(json!(outcome)))
}

// ── Filesystem ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

pub async fn read_file(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let content = state
        .bay
        .router
        .fs_read(&owner, &SandboxId::new(id), &query.path, Utc::now())
        .await?;
    Ok(Json(json!({ "path": query.path, "content": content })))
}

#[derive(Debug, Deserialize)]
pub struct WriteFileBody {
    pub path: String,
    pub content: String,
}

pub async fn write_file(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<WriteFileBody>,
) -> Result<StatusCode, ApiError> {
    state
        .bay
        .router
        .fs_write(&owner, &SandboxId::new(id), &body.path, &body.content, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .bay
        .router
        .fs_delete(&owner, &SandboxId::new(id), &query.path, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_directory(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .bay
        .router
        .fs_list(&owner, &SandboxId::new(id), &query.path, Utc::now())
        .await?;
    Ok(Json(json!({ "path": query.path, "entries": entries })))
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub path: String,
    pub content_b64: String,
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<UploadBody>,
) -> Result<StatusCode, ApiError> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(&body.content_b64)
        .map_err(|e| ApiError::bad_request(format!("invalid base64 content: {e}")))?;
    state
        .bay
        .router
        .fs_upload(&owner, &SandboxId::new(id), &body.path, &content, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, ApiError> {
    let bytes = state
        .bay
        .router
        .fs_download(&owner, &SandboxId::new(id), &query.path, Utc::now())
        .await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(Json(json!({ "path": query.path, "content_b64": encoded })))
}

// ── Browser ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BrowserBody {
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn browser_exec(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<BrowserBody>,
) -> Result<Json<Value>, ApiError> {
    let step = state
        .bay
        .router
        .browser_exec(&owner, &SandboxId::new(id), &body.command, body.timeout_ms, Utc::now())
        .await?;
    Ok(Json(json!(step)))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BrowserBatchBody {
    pub commands: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stop_on_error: bool,
}

pub async fn browser_batch(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BrowserBatchBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let sandbox_id = SandboxId::new(id);
    let body_value = serde_json::to_value(&body)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let scope = format!("POST /v1/sandboxes/{sandbox_id}/browser/exec_batch");
    let (status, value) = with_idempotency(
        &state,
        &owner,
        scope,
        &headers,
        &body_value,
        || async {
            let batch = state
                .bay
                .router
                .browser_batch(
                    &owner,
                    &sandbox_id,
                    &body.commands,
                    body.timeout_ms,
                    body.stop_on_error,
                    Utc::now(),
                )
                .await?;
            Ok((StatusCode::OK, json!(batch)))
        },
    )
    .await?;
    Ok((status, Json(value)))
}
