use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use bay_domain::{ExecType, ExecutionId, Owner, SandboxId};
use bay_orchestrator::HistoryQuery;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::handlers::execution_json;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub sandbox_id: Option<String>,
    #[serde(rename = "type")]
    pub exec_type: Option<ExecType>,
    pub success: Option<bool>,
    pub tag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let rows = state
        .bay
        .history
        .list(
            &owner,
            HistoryQuery {
                sandbox_id: query.sandbox_id.map(SandboxId::new),
                exec_type: query.exec_type,
                success: query.success,
                tag: query.tag,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;
    let rows: Vec<Value> = rows.iter().map(execution_json).collect();
    Ok(Json(json!(rows)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state.bay.history.get(&owner, &ExecutionId::new(id)).await?;
    Ok(Json(execution_json(&row)))
}

pub async fn last_for_sandbox(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let row = state.bay.history.last_for_sandbox(&owner, &SandboxId::new(id)).await?;
    Ok(Json(execution_json(&row)))
}

#[derive(Debug, Deserialize)]
pub struct AnnotateBody {
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

pub async fn annotate(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(body): Json<AnnotateBody>,
) -> Result<Json<Value>, ApiError> {
    let row = state
        .bay
        .history
        .annotate(&owner, &ExecutionId::new(id), body.description, body.tags, body.notes)
        .await?;
    Ok(Json(execution_json(&row)))
}
